//! Friend and block lists. Both live on the character; these helpers keep
//! the invariants (caps, precedence of blocks) in one place.
use crate::{
    character::Character,
    error::{WorldError, WorldResult},
};

pub fn add_friend(owner: &mut Character, name: &str, cap: usize) -> WorldResult<()> {
    let name = name.trim();
    if name.is_empty() || name == owner.name {
        return Err(WorldError::InvalidName);
    }
    if owner.friends.iter().any(|f| f == name) {
        return Ok(());
    }
    if owner.friends.len() >= cap {
        return Err(WorldError::ResourceExhaustion);
    }
    // a blocked name cannot be a friend
    if owner.blocked.iter().any(|b| b == name) {
        return Err(WorldError::RequirementUnmet);
    }
    owner.friends.push(name.to_owned());
    Ok(())
}

pub fn remove_friend(owner: &mut Character, name: &str) -> WorldResult<()> {
    let before = owner.friends.len();
    owner.friends.retain(|f| f != name);
    if owner.friends.len() == before {
        return Err(WorldError::InvalidTarget);
    }
    Ok(())
}

/// Blocking wins over friendship: the name is dropped from the friend list
/// in the same call.
pub fn add_block(owner: &mut Character, name: &str, cap: usize) -> WorldResult<()> {
    let name = name.trim();
    if name.is_empty() || name == owner.name {
        return Err(WorldError::InvalidName);
    }
    if owner.blocked.iter().any(|b| b == name) {
        return Ok(());
    }
    if owner.blocked.len() >= cap {
        return Err(WorldError::ResourceExhaustion);
    }
    owner.friends.retain(|f| f != name);
    owner.blocked.push(name.to_owned());
    Ok(())
}

pub fn remove_block(owner: &mut Character, name: &str) -> WorldResult<()> {
    let before = owner.blocked.len();
    owner.blocked.retain(|b| b != name);
    if owner.blocked.len() == before {
        return Err(WorldError::InvalidTarget);
    }
    Ok(())
}

/// Whether `recipient` accepts whispers and status notifications from
/// `sender_name`.
pub fn accepts_from(recipient: &Character, sender_name: &str) -> bool {
    !recipient.blocked.iter().any(|b| b == sender_name)
}

#[cfg(test)]
mod tests {
    use tmsrv_primitives::{AccountId, CharacterClass, CharacterId, MapId, Position};

    use super::*;
    use crate::content::ContentTables;

    fn someone() -> Character {
        let content = ContentTables::fixture();
        Character::new(
            &content,
            CharacterId(1),
            AccountId(1),
            "keeper".into(),
            CharacterClass::Foema,
            Position::new(MapId(1), 100, 100),
        )
    }

    #[test]
    fn caps_are_enforced() {
        let mut c = someone();
        for index in 0..3 {
            add_friend(&mut c, &format!("friend{index}"), 3).expect("fits");
        }
        assert_eq!(
            add_friend(&mut c, "one-too-many", 3),
            Err(WorldError::ResourceExhaustion)
        );
    }

    #[test]
    fn block_evicts_friendship_and_wins() {
        let mut c = someone();
        add_friend(&mut c, "twoface", 10).expect("friends at first");
        add_block(&mut c, "twoface", 10).expect("then blocked");
        assert!(c.friends.is_empty());
        assert!(!accepts_from(&c, "twoface"));
        assert_eq!(
            add_friend(&mut c, "twoface", 10),
            Err(WorldError::RequirementUnmet)
        );
        remove_block(&mut c, "twoface").expect("unblock");
        assert!(accepts_from(&c, "twoface"));
        add_friend(&mut c, "twoface", 10).expect("friends again");
    }

    #[test]
    fn self_references_are_rejected() {
        let mut c = someone();
        assert_eq!(add_friend(&mut c, "keeper", 10), Err(WorldError::InvalidName));
        assert_eq!(add_block(&mut c, "keeper", 10), Err(WorldError::InvalidName));
    }

    #[test]
    fn duplicate_adds_are_idempotent() {
        let mut c = someone();
        add_friend(&mut c, "pal", 10).expect("first");
        add_friend(&mut c, "pal", 10).expect("second is a no-op");
        assert_eq!(c.friends.len(), 1);
    }
}
