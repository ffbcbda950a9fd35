pub mod tokens;

pub use tokens::{
    CreateTokenRequest, CreateTokenResponse, HealthResponse, ListTokensQuery, StatsResponse,
    TokenData, TokenListResponse, TokenResponse,
};
