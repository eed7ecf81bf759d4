//! Short codes for rooms, players and PINs.

use base64::{Engine, engine::general_purpose::STANDARD};
use rand::Rng;
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

const ROOM_ID_LEN: usize = 10;
const PLAYER_ID_LEN: usize = 15;

/// Room id for `owner_token` created at `timestamp_ms`.
///
/// First ten hex characters of `sha256(owner_token ++ timestamp_ms)`.
pub fn derive_room_id(owner_token: &str, timestamp_ms: i128) -> String {
    let mut hasher = Sha256::new();
    hasher.update(owner_token.as_bytes());
    hasher.update(timestamp_ms.to_string().as_bytes());
    let mut digest = hex::encode(hasher.finalize());
    digest.truncate(ROOM_ID_LEN);
    digest
}

/// Room id for `owner_token` created now.
pub fn new_room_id(owner_token: &str) -> String {
    let now_ms = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
    derive_room_id(owner_token, now_ms)
}

/// Deterministic player id for a user inside a room.
///
/// Standard base64 of `"{user_token}-{room_id}"` cut to fifteen characters.
/// Fifteen base64 characters cover the first eleven input bytes, so two inputs
/// sharing those bytes collide.
pub fn derive_player_id(user_token: &str, room_id: &str) -> String {
    let mut encoded = STANDARD.encode(format!("{user_token}-{room_id}"));
    encoded.truncate(PLAYER_ID_LEN);
    encoded
}

/// Four digit PIN, uniform over `1000..=9999`.
pub fn generate_pin() -> String {
    generate_pin_with(&mut rand::rng())
}

/// [`generate_pin`] drawing from `rng`.
pub fn generate_pin_with<R: Rng + ?Sized>(rng: &mut R) -> String {
    rng.random_range(1000..=9999u16).to_string()
}

/// PIN for a new room: random when private, empty otherwise.
pub fn pin_for(is_private: bool) -> String {
    if is_private {
        generate_pin()
    } else {
        String::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{SeedableRng, rngs::StdRng};

    #[test]
    fn player_id_is_deterministic() {
        let first = derive_player_id("user-token-1", "abcdef0123");
        assert_eq!(first, derive_player_id("user-token-1", "abcdef0123"));
        assert_eq!(first.len(), 15);
        assert_eq!(first, "dXNlci10b2tlbi0");
    }

    #[test]
    fn player_ids_collide_on_shared_prefix() {
        assert_eq!(
            derive_player_id("0123456789a", "room1"),
            derive_player_id("0123456789a", "room2")
        );
    }

    #[test]
    fn room_id_is_ten_hex_chars_and_depends_on_time() {
        let id = derive_room_id("owner", 1_700_000_000_000);
        assert_eq!(id.len(), 10);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(id, derive_room_id("owner", 1_700_000_000_000));
        assert_ne!(id, derive_room_id("owner", 1_700_000_000_001));
    }

    #[test]
    fn room_id_hashes_token_then_decimal_timestamp() {
        assert_eq!(derive_room_id("owner", 1_700_000_000_000), "a8325d24e2");
    }

    #[test]
    fn pins_are_four_digits_in_range() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..1_000 {
            let pin = generate_pin_with(&mut rng);
            assert_eq!(pin.len(), 4);
            let value: u16 = pin.parse().unwrap();
            assert!((1000..=9999).contains(&value));
        }
    }

    #[test]
    fn public_rooms_have_no_pin() {
        assert!(pin_for(false).is_empty());
        assert_eq!(pin_for(true).len(), 4);
    }
}
