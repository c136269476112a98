use nanoid::nanoid;

/// Length of the random part of a lock token.
const TOKEN_RANDOM_LENGTH: usize = 16;

/// Generates a token identifying one lock acquisition.
///
/// The token is `<pid>-<random>` so an operator inspecting the lock key can
/// tell which process holds it.
pub fn generate_lock_token() -> String {
    format!("{}-{}", std::process::id(), nanoid!(TOKEN_RANDOM_LENGTH))
}
