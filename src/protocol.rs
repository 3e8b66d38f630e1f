// First-message discriminators (§6) — the tagged union the dispatcher
// switches on, plus the termination-marker tag used inside a session
// tick (§4.8, §9 "Variant dispatch").

pub const REGISTER1: &str = "register1";
pub const LOGIN1: &str = "login1";
pub const LOGIN2: &str = "login2";
pub const STEAM_REGISTER: &str = "steam_register";
pub const STEAM_LOGIN: &str = "steam_login";
pub const GET_STATS: &str = "get-stats";
pub const BUY_ITEM: &str = "buy-item";
pub const SET_TITLE: &str = "set-title";
pub const SYNC_CAMPAIGN: &str = "sync-campaign";
pub const QUEUE_1V1: &str = "1v1";
pub const QUEUE_V3: &str = "v3";
pub const QUEUE_V4: &str = "v4";
pub const QUEUE_V34: &str = "v34";

/// One of the three game modes a queue or session can be running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    OneVOne,
    V3,
    V4,
}

impl Mode {
    pub fn target_player_count(self) -> usize {
        match self {
            Mode::OneVOne => 2,
            Mode::V3 => 3,
            Mode::V4 => 4,
        }
    }

    pub fn map_range(self) -> std::ops::RangeInclusive<u32> {
        match self {
            Mode::OneVOne => 1..=30,
            Mode::V3 => 31..=33,
            Mode::V4 => 37..=39,
        }
    }

    pub fn queue_type_str(self) -> &'static str {
        match self {
            Mode::OneVOne => QUEUE_1V1,
            Mode::V3 => QUEUE_V3,
            Mode::V4 => QUEUE_V4,
        }
    }

    pub fn from_type_str(s: &str) -> Option<Mode> {
        match s {
            QUEUE_1V1 => Some(Mode::OneVOne),
            QUEUE_V3 => Some(Mode::V3),
            QUEUE_V4 => Some(Mode::V4),
            _ => None,
        }
    }
}

/// The terminal "end-game" variant carried in a tick payload.
#[derive(Debug, Clone, PartialEq)]
pub enum EndGame {
    Winner(usize),
    Surrender,
    ConnectionLost,
    Peace,
}

impl EndGame {
    /// Parse the `end-game` field of a tick payload, if present.
    pub fn from_value(v: &serde_json::Value) -> Option<EndGame> {
        let field = v.get("end-game")?;
        if let Some(s) = field.as_str() {
            return match s {
                "surrender" => Some(EndGame::Surrender),
                "connection-lost" => Some(EndGame::ConnectionLost),
                _ => None,
            };
        }
        if let Some(f) = field.as_f64() {
            if (f - 0.5).abs() < f64::EPSILON {
                return Some(EndGame::Peace);
            }
            if f.fract() == 0.0 && f >= 0.0 {
                return Some(EndGame::Winner(f as usize));
            }
        }
        None
    }

    pub fn to_value(&self) -> serde_json::Value {
        use serde_json::json;
        match self {
            EndGame::Winner(seat) => json!({ "end-game": seat }),
            EndGame::Surrender => json!({ "end-game": "surrender" }),
            EndGame::ConnectionLost => json!({ "end-game": "connection-lost" }),
            EndGame::Peace => json!({ "end-game": 0.5 }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_numeric_winner() {
        assert_eq!(
            EndGame::from_value(&json!({"end-game": 1})),
            Some(EndGame::Winner(1))
        );
    }

    #[test]
    fn parses_string_variants() {
        assert_eq!(
            EndGame::from_value(&json!({"end-game": "surrender"})),
            Some(EndGame::Surrender)
        );
        assert_eq!(
            EndGame::from_value(&json!({"end-game": "connection-lost"})),
            Some(EndGame::ConnectionLost)
        );
    }

    #[test]
    fn parses_peace_draw() {
        assert_eq!(
            EndGame::from_value(&json!({"end-game": 0.5})),
            Some(EndGame::Peace)
        );
    }
}
