/// Input validation functions for all backend routes
use thiserror::Error;

const MAX_PLAYERS: usize = 1000;
const MAX_SERVER_NAME: usize = 64;
const MAX_LATENCY_MS: i32 = 30_000;

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Player name cannot be empty")]
    PlayerNameEmpty,

    #[error("Player name too long (max 16 characters, got {0})")]
    PlayerNameTooLong(usize),

    #[error("Player name contains invalid characters (only alphanumeric and underscore allowed)")]
    PlayerNameInvalidChars,

    #[error("Player list too large (max {max} players, got {actual})")]
    PlayerListTooLarge { max: usize, actual: usize },

    #[error("Server name cannot be empty")]
    ServerNameEmpty,

    #[error("Server name too long (max 64 characters, got {0})")]
    ServerNameTooLong(usize),

    #[error("Server name contains invalid characters (only alphanumeric, '-' and '_' allowed)")]
    ServerNameInvalidChars,

    #[error("Server address cannot be empty")]
    AddressEmpty,

    #[error("Latency out of range (0 to 30000 ms, got {0})")]
    LatencyOutOfRange(i32),

    #[error("Unknown game mode {0} (expected 0 to 3)")]
    GameModeOutOfRange(i32),
}

/// Validates a Minecraft player name
///
/// Rules:
/// - Cannot be empty
/// - Max 16 characters (Minecraft username limit)
/// - Only alphanumeric characters and underscores
pub fn validate_player_name(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::PlayerNameEmpty);
    }

    if name.len() > 16 {
        return Err(ValidationError::PlayerNameTooLong(name.len()));
    }

    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(ValidationError::PlayerNameInvalidChars);
    }

    Ok(())
}

/// Validates a backend server name. It ends up in virtual identities and
/// URL paths, so it is kept to a conservative charset.
pub fn validate_server_name(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::ServerNameEmpty);
    }

    if name.len() > MAX_SERVER_NAME {
        return Err(ValidationError::ServerNameTooLong(name.len()));
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ValidationError::ServerNameInvalidChars);
    }

    Ok(())
}

pub fn validate_address(address: &str) -> Result<(), ValidationError> {
    if address.trim().is_empty() {
        return Err(ValidationError::AddressEmpty);
    }
    Ok(())
}

pub fn validate_latency(latency: i32) -> Result<(), ValidationError> {
    if !(0..=MAX_LATENCY_MS).contains(&latency) {
        return Err(ValidationError::LatencyOutOfRange(latency));
    }
    Ok(())
}

pub fn validate_game_mode(game_mode: i32) -> Result<(), ValidationError> {
    if !(0..=3).contains(&game_mode) {
        return Err(ValidationError::GameModeOutOfRange(game_mode));
    }
    Ok(())
}

/// Validates one reported player
pub fn validate_player(name: &str, latency: i32, game_mode: i32) -> Result<(), ValidationError> {
    validate_player_name(name)?;
    validate_latency(latency)?;
    validate_game_mode(game_mode)
}

/// Validates the size of a bulk roster report
///
/// Rules:
/// - Max 1000 players per request (prevents DOS)
pub fn validate_player_count(count: usize) -> Result<(), ValidationError> {
    if count > MAX_PLAYERS {
        return Err(ValidationError::PlayerListTooLarge {
            max: MAX_PLAYERS,
            actual: count,
        });
    }
    Ok(())
}
