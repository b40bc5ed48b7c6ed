/// HTTP middleware
///
/// - `context`: per-request [`RequestContext`](toq_shared::telemetry::RequestContext)
///   extractor and bearer-token authentication

pub mod context;
