//! Provider adapters.
//!
//! Each adapter recognises its provider's deliveries by a header and turns
//! them into a [`HookAction`](super::HookAction).

mod bitbucket;
mod generic;
mod gitee;
mod github;
mod gitlab;
mod gogs;
mod travis;

pub use bitbucket::Bitbucket;
pub use generic::Generic;
pub use gitee::Gitee;
pub use github::GitHub;
pub use gitlab::GitLab;
pub use gogs::Gogs;
pub use travis::Travis;

/// Every name accepted as a hook `type` in the configuration.
pub const PROVIDER_NAMES: [&str; 7] = [
    "github",
    "gitlab",
    "bitbucket",
    "gogs",
    "gitee",
    "generic",
    "travis",
];
