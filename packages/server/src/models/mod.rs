//! Persistent rows and their SQL.

pub mod account;
pub mod action;
pub mod job;

pub use account::{Account, AccountKind, OauthState, ValidationState};
pub use action::{
    Action, ActionClass, ActionStatus, ActionType, ApiMethod, NewAction, RateLimitHint,
};
pub use job::{
    BatchSearchParams, ComposeParams, CreatePostParams, DmParams, EngageParams, FollowParams,
    Job, JobInput, JobStats, JobStatus, JobType, ProfileUpdateParams, ScrapePostsParams,
    ScrapeProfileParams, SearchParams, TrendingParams,
};
