//! Naming rules for channels and nicknames.

/// Maximum channel name length.
pub const MAX_CHANNEL_NAME_LENGTH: usize = 120;

/// Maximum nickname length.
pub const MAX_NICK_LENGTH: usize = 24;

/// Validate a channel name.
///
/// # Errors
///
/// Returns an error message if the channel name is invalid.
pub fn validate_channel_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("Channel name cannot be empty");
    }
    if name.chars().count() > MAX_CHANNEL_NAME_LENGTH {
        return Err("Channel name too long");
    }
    if name.starts_with('$') {
        return Err("Channel names starting with '$' are reserved");
    }
    if name.chars().any(char::is_control) {
        return Err("Channel name contains invalid characters");
    }
    Ok(())
}

/// Validate a nickname: 1 to 24 ASCII letters, digits, or underscores.
///
/// # Errors
///
/// Returns an error message if the nickname is invalid.
pub fn validate_nick(nick: &str) -> Result<(), &'static str> {
    if nick.is_empty() {
        return Err("Nickname cannot be empty");
    }
    if nick.len() > MAX_NICK_LENGTH {
        return Err("Nickname too long");
    }
    if !nick.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err("Nickname must consist of up to 24 letters, numbers, and underscores");
    }
    Ok(())
}
