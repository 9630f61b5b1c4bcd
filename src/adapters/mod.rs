pub mod http_client;
pub mod http_handler;

pub use http_client::UpstreamHttpClient;
pub use http_handler::HttpHandler;
