//! Enrollment credential generation.

use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::Rng;

pub const TOKEN_PREFIX: &str = "TAK-";
pub const TOKEN_SUFFIX: &str = "-ENR";
pub const TOKEN_RANDOM_LEN: usize = 18;

/// Generate a credential: fixed prefix, 18 characters from the 62-symbol
/// alphanumeric alphabet drawn from the OS CSPRNG, fixed suffix.
pub fn generate_token() -> String {
    let random: String = OsRng
        .sample_iter(&Alphanumeric)
        .take(TOKEN_RANDOM_LEN)
        .map(char::from)
        .collect();
    format!("{}{}{}", TOKEN_PREFIX, random, TOKEN_SUFFIX)
}

/// True when `value` has the shape produced by [`generate_token`].
pub fn is_token_format(value: &str) -> bool {
    value
        .strip_prefix(TOKEN_PREFIX)
        .and_then(|rest| rest.strip_suffix(TOKEN_SUFFIX))
        .is_some_and(|body| {
            body.len() == TOKEN_RANDOM_LEN && body.chars().all(|c| c.is_ascii_alphanumeric())
        })
}
