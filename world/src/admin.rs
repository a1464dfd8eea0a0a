//! Admin command execution. Commands arrive as text either from an
//! in-world admin session or from the admin CLI; every invocation is
//! audited by the caller. Result code 0 is success; anything else is a
//! domain error the CLI surfaces as its exit code.
use log::info;

use network_session::{
    packets::{ChatNotify, ServerPacket},
    SessionId,
};
use tmsrv_primitives::{AccountId, MapId, Position, WireName};

use crate::{
    content::ContentTables,
    error::WorldError,
    security::BanEntry,
    tick::World,
    LOG_TARGET,
};

pub mod result_code {
    pub const OK: u16 = 0;
    pub const BAD_SYNTAX: u16 = 1;
    pub const UNKNOWN_COMMAND: u16 = 2;
    pub const NO_SUCH_TARGET: u16 = 3;
    pub const REJECTED: u16 = 4;
}

impl World {
    /// Parses and runs one admin command line. Returns (code, message).
    pub(crate) fn run_admin_command(
        &mut self,
        _session: SessionId,
        admin: AccountId,
        line: &str,
    ) -> (u16, String) {
        let mut parts = line.split_whitespace();
        let Some(command) = parts.next() else {
            return (result_code::BAD_SYNTAX, "empty command".into());
        };
        let args: Vec<&str> = parts.collect();
        info!(target: LOG_TARGET, "admin {} runs: {}", admin, line);
        match command {
            "broadcast" => {
                let message = args.join(" ");
                if message.is_empty() {
                    return (result_code::BAD_SYNTAX, "broadcast <text>".into());
                }
                let mut text = [0u8; 128];
                let bytes = message.as_bytes();
                let len = bytes.len().min(128);
                text[..len].copy_from_slice(&bytes[..len]);
                self.broadcast_all(ServerPacket::ChatNotify(ChatNotify {
                    channel: 5,
                    reserved: [0; 3],
                    from: WireName::from_str("server"),
                    text,
                }));
                (result_code::OK, "broadcast sent".into())
            }
            "kick" => {
                let Some(name) = args.first() else {
                    return (result_code::BAD_SYNTAX, "kick <character>".into());
                };
                match self.players.by_name(name).and_then(|id| self.players.session_of(id)) {
                    Some(session) => {
                        self.kick_session(session, 4);
                        (result_code::OK, format!("kicked {name}"))
                    }
                    None => (result_code::NO_SUCH_TARGET, format!("{name} is not online")),
                }
            }
            "ban" => {
                // ban <character> <hours|perm> [reason...]
                let (Some(name), Some(duration)) = (args.first(), args.get(1)) else {
                    return (
                        result_code::BAD_SYNTAX,
                        "ban <character> <hours|perm> [reason]".into(),
                    );
                };
                let Some(character) = self.players.by_name(name) else {
                    return (result_code::NO_SUCH_TARGET, format!("no character {name}"));
                };
                let account = self.players.get(character).map(|c| c.account).ok();
                let reason = if args.len() > 2 {
                    args[2..].join(" ")
                } else {
                    "admin ban".into()
                };
                let permanent = *duration == "perm";
                let hours: u64 = duration.parse().unwrap_or(0);
                if !permanent && hours == 0 {
                    return (result_code::BAD_SYNTAX, "hours must be a number or perm".into());
                }
                self.security.add_ban(BanEntry {
                    address: None,
                    account,
                    character: Some(character),
                    reason,
                    start_ms: self.now_ms,
                    end_ms: self.now_ms + hours * 60 * 60 * 1000,
                    permanent,
                });
                if let Some(session) = self.players.session_of(character) {
                    self.kick_session(session, 3);
                }
                (result_code::OK, format!("banned {name}"))
            }
            "unban" => {
                let Some(name) = args.first() else {
                    return (result_code::BAD_SYNTAX, "unban <character>".into());
                };
                match self
                    .players
                    .by_name(name)
                    .and_then(|id| self.players.get(id).map(|c| c.account).ok())
                {
                    Some(account) => {
                        let lifted = self.security.unban_account(account);
                        (result_code::OK, format!("lifted {lifted} bans"))
                    }
                    None => (result_code::NO_SUCH_TARGET, format!("no character {name}")),
                }
            }
            "teleport" => {
                // teleport <character> <map> <x> <y>
                let (Some(name), Some(map), Some(x), Some(y)) =
                    (args.first(), args.get(1), args.get(2), args.get(3))
                else {
                    return (
                        result_code::BAD_SYNTAX,
                        "teleport <character> <map> <x> <y>".into(),
                    );
                };
                let (Ok(map), Ok(x), Ok(y)) = (map.parse(), x.parse(), y.parse()) else {
                    return (result_code::BAD_SYNTAX, "coordinates must be numbers".into());
                };
                match self.admin_teleport(name, MapId(map), x, y) {
                    Ok(()) => (result_code::OK, format!("{name} moved")),
                    Err(WorldError::UnknownCharacter) => {
                        (result_code::NO_SUCH_TARGET, format!("no character {name}"))
                    }
                    Err(e) => (result_code::REJECTED, e.to_string()),
                }
            }
            "spawn" => {
                // spawn <template> <map> <x> <y> [count]
                let (Some(template), Some(map), Some(x), Some(y)) =
                    (args.first(), args.get(1), args.get(2), args.get(3))
                else {
                    return (
                        result_code::BAD_SYNTAX,
                        "spawn <template> <map> <x> <y> [count]".into(),
                    );
                };
                let (Ok(template), Ok(map), Ok(x), Ok(y)) =
                    (template.parse::<u16>(), map.parse(), x.parse(), y.parse())
                else {
                    return (result_code::BAD_SYNTAX, "arguments must be numbers".into());
                };
                let count: u16 = args.get(4).and_then(|c| c.parse().ok()).unwrap_or(1);
                let mut spawned = 0;
                for _ in 0..count.min(50) {
                    if self
                        .spawn_mob_at(template, Position::new(MapId(map), x, y), vec![])
                        .is_some()
                    {
                        spawned += 1;
                    }
                }
                if spawned == 0 {
                    (result_code::NO_SUCH_TARGET, format!("no mob template {template}"))
                } else {
                    (result_code::OK, format!("spawned {spawned}"))
                }
            }
            "give-item" => {
                // give-item <character> <item> [count]
                let (Some(name), Some(item)) = (args.first(), args.get(1)) else {
                    return (
                        result_code::BAD_SYNTAX,
                        "give-item <character> <item> [count]".into(),
                    );
                };
                let Ok(item) = item.parse::<u16>() else {
                    return (result_code::BAD_SYNTAX, "item must be a number".into());
                };
                let count: u32 = args.get(2).and_then(|c| c.parse().ok()).unwrap_or(1);
                match self.admin_give_item(name, item, count) {
                    Ok(()) => (result_code::OK, format!("gave {count} of {item} to {name}")),
                    Err(WorldError::UnknownCharacter) => {
                        (result_code::NO_SUCH_TARGET, format!("no character {name}"))
                    }
                    Err(e) => (result_code::REJECTED, e.to_string()),
                }
            }
            "set-gold" => {
                let (Some(name), Some(amount)) = (args.first(), args.get(1)) else {
                    return (result_code::BAD_SYNTAX, "set-gold <character> <amount>".into());
                };
                let Ok(amount) = amount.parse::<u32>() else {
                    return (result_code::BAD_SYNTAX, "amount must be a number".into());
                };
                match self.admin_set_gold(name, amount) {
                    Ok(()) => (result_code::OK, format!("{name} now carries {amount}")),
                    Err(WorldError::UnknownCharacter) => {
                        (result_code::NO_SUCH_TARGET, format!("no character {name}"))
                    }
                    Err(e) => (result_code::REJECTED, e.to_string()),
                }
            }
            "reload-content" => match &self.config.content_dir {
                Some(dir) => match ContentTables::load(dir) {
                    Ok(tables) => {
                        self.content = tables;
                        (result_code::OK, "content reloaded".into())
                    }
                    Err(e) => (result_code::REJECTED, format!("reload failed: {e}")),
                },
                None => (
                    result_code::REJECTED,
                    "server runs on built-in content".into(),
                ),
            },
            "dump-stats" => {
                let (escrow_units, escrow_gold) = self.market.escrow_totals();
                let message = format!(
                    "tick={} players={} online={} mobs={} ground={} bans={} escrow_units={} escrow_gold={} dirty={}",
                    self.now_ms,
                    self.players.len(),
                    self.players.online().count(),
                    self.mobs.values().filter(|m| m.is_alive()).count(),
                    self.ground.len(),
                    self.security.ban_count(),
                    escrow_units,
                    escrow_gold,
                    self.players.dirty_count(),
                );
                (result_code::OK, message)
            }
            _ => (result_code::UNKNOWN_COMMAND, format!("unknown command {command}")),
        }
    }

    fn admin_teleport(&mut self, name: &str, map: MapId, x: u16, y: u16) -> Result<(), WorldError> {
        let id = self.players.by_name(name).ok_or(WorldError::UnknownCharacter)?;
        let destination = Position::new(map, x, y);
        if !destination.in_bounds() {
            return Err(WorldError::OutOfBounds);
        }
        let content = self.content.clone();
        content.maps.map(map)?;
        let from = self.players.get(id)?.position;
        {
            let character = self.players.get_mut(id)?;
            character.position = destination;
        }
        self.players.mark_dirty(id);
        self.spatial.move_character(id, &from, &destination);
        self.send_to_character(
            id,
            ServerPacket::TeleportNotify(network_session::packets::TeleportNotify {
                map: map.0,
                x,
                y,
                reserved: 0,
            }),
        );
        Ok(())
    }

    fn admin_give_item(&mut self, name: &str, item: u16, count: u32) -> Result<(), WorldError> {
        let id = self.players.by_name(name).ok_or(WorldError::UnknownCharacter)?;
        let content = self.content.clone();
        content.items.template(item)?;
        {
            let character = self.players.get_mut(id)?;
            character
                .containers
                .add_to_inventory(&content.items, tmsrv_primitives::ItemInstance::new(item, count))?;
        }
        self.players.mark_dirty(id);
        self.audit.record(
            self.now_ms,
            crate::audit::AuditEvent::ItemCreated {
                owner: id,
                item_id: item,
                count,
                source: "admin",
            },
        );
        self.push_full_inventory(id);
        Ok(())
    }

    fn admin_set_gold(&mut self, name: &str, amount: u32) -> Result<(), WorldError> {
        let id = self.players.by_name(name).ok_or(WorldError::UnknownCharacter)?;
        let previous = {
            let character = self.players.get_mut(id)?;
            let previous = character.gold;
            character.gold = amount.min(tmsrv_primitives::GOLD_LIMIT);
            previous
        };
        self.players.mark_dirty(id);
        self.audit.record(
            self.now_ms,
            crate::audit::AuditEvent::GoldDelta {
                owner: id,
                delta: i64::from(amount) - i64::from(previous),
                reason: "admin set-gold",
            },
        );
        self.push_gold_update(id);
        Ok(())
    }
}
