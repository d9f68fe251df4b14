//! Bundled provider client and pre-defined provider configurations.

mod config;
mod http;

pub use config::{
    square_config, zoom_config, AccountInfoEndpoint, ClientAuth, HttpProviderConfig, Revocation,
    SquareEnvironment, TokenRequestFormat,
};
pub use http::HttpProvider;
