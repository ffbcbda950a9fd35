pub mod qr;
pub mod token;
pub mod validation;

pub use qr::generate_qr_png;
pub use token::{generate_token, is_token_format, TOKEN_PREFIX, TOKEN_RANDOM_LEN, TOKEN_SUFFIX};
pub use validation::{validate_username, ValidatedJson};
