use rand::Rng;

/// Lobby codes: lowercase, no look-alike characters.
pub const LOBBY_CODE_CHARSET: &[u8] = b"abcdefghjkmnpqrstuvwxyz23456789";
/// Relay join codes: uppercase, no look-alike characters.
pub const JOIN_CODE_CHARSET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";
pub const CODE_LENGTH: usize = 6;

pub fn generate_code(charset: &[u8]) -> String {
    let mut rng = rand::rng();
    (0..CODE_LENGTH)
        .map(|_| charset[rng.random_range(0..charset.len())] as char)
        .collect()
}

pub fn generate_unique_code<F>(charset: &[u8], exists: F) -> String
where
    F: Fn(&str) -> bool,
{
    loop {
        let code = generate_code(charset);
        if !exists(&code) {
            return code;
        }
    }
}
