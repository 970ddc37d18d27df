pub mod resource;
pub mod rewrite;
pub mod stream;

pub use resource::{ProxyEndpoint, ResourceKind, RewritePolicy};
pub use rewrite::{LineKind, LineRewriter, RewriteStats};
pub use stream::RewriteStream;
