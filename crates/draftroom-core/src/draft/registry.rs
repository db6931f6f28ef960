// Team slot registration.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DraftError;

/// The integer identity of a registered team, in `[1, total_team_count]`.
///
/// Deserializing goes through [`TryFrom<u32>`], so a 0 from the wire or from
/// a stored record is rejected like any other malformed input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct TeamSlot(u32);

impl TeamSlot {
    /// Returns `None` for 0; slots are 1-based.
    pub fn new(n: u32) -> Option<Self> {
        (n >= 1).then_some(TeamSlot(n))
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl TryFrom<u32> for TeamSlot {
    type Error = DraftError;

    fn try_from(n: u32) -> Result<Self, Self::Error> {
        TeamSlot::new(n).ok_or_else(|| DraftError::validation("slot", "team slots start at 1"))
    }
}

impl From<TeamSlot> for u32 {
    fn from(slot: TeamSlot) -> u32 {
        slot.0
    }
}

impl fmt::Display for TeamSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A successful registration. `token` is the secret that lets the same
/// team reclaim `slot` from a new connection; it is never broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    pub slot: TeamSlot,
    pub name: String,
    pub token: String,
}

fn mint_token() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Assigns slots to team names, bounded by the configured team count.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeamRegistry {
    total: Option<usize>,
    teams: BTreeMap<TeamSlot, String>,
    tokens: BTreeMap<TeamSlot, String>,
}

impl TeamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a registry from persisted parts, rejecting records that break
    /// the slot-range or name-uniqueness invariants. Tokens of unregistered
    /// slots are dropped; a registered slot without a token cannot be
    /// reclaimed.
    pub fn from_parts(
        total: Option<usize>,
        teams: BTreeMap<TeamSlot, String>,
        mut tokens: BTreeMap<TeamSlot, String>,
    ) -> Result<Self, DraftError> {
        match total {
            None if !teams.is_empty() => {
                return Err(DraftError::validation(
                    "registered_teams",
                    "teams are registered but no team count is set",
                ));
            }
            Some(total) => {
                if let Some(slot) = teams.keys().find(|s| s.get() as usize > total) {
                    return Err(DraftError::validation(
                        "registered_teams",
                        format!("slot {slot} is outside 1..={total}"),
                    ));
                }
            }
            None => {}
        }

        let mut seen = std::collections::HashSet::new();
        for name in teams.values() {
            if !seen.insert(name.as_str()) {
                return Err(DraftError::validation(
                    "registered_teams",
                    format!("team name `{name}` is bound to more than one slot"),
                ));
            }
        }

        tokens.retain(|slot, token| teams.contains_key(slot) && !token.is_empty());
        Ok(Self {
            total,
            teams,
            tokens,
        })
    }

    /// Register `name` and return its slot and reclaim token.
    ///
    /// `reclaim` is a `(slot, token)` pair from an earlier registration. When
    /// the token matches, the existing registration is returned unchanged so a
    /// client can recover its identity after a reload. A mismatch is refused
    /// outright; the slot's name alone proves nothing.
    pub fn register(
        &mut self,
        name: &str,
        reclaim: Option<(TeamSlot, &str)>,
    ) -> Result<Registration, DraftError> {
        if let Some((slot, token)) = reclaim {
            return self.reclaim(slot, token);
        }

        let name = name.trim();
        if name.is_empty() {
            return Err(DraftError::validation("name", "team name must not be empty"));
        }
        let total = self.total.ok_or(DraftError::TeamCountUnset)?;

        if self.slot_of(name).is_some() {
            return Err(DraftError::DuplicateName(name.to_string()));
        }
        if self.teams.len() >= total {
            return Err(DraftError::SlotsExhausted(total));
        }

        let slot = (1..=total as u32)
            .map(TeamSlot)
            .find(|s| !self.teams.contains_key(s))
            .ok_or(DraftError::SlotsExhausted(total))?;
        let token = mint_token();
        self.teams.insert(slot, name.to_string());
        self.tokens.insert(slot, token.clone());
        Ok(Registration {
            slot,
            name: name.to_string(),
            token,
        })
    }

    fn reclaim(&self, slot: TeamSlot, token: &str) -> Result<Registration, DraftError> {
        match (self.teams.get(&slot), self.tokens.get(&slot)) {
            (Some(name), Some(expected)) if !token.is_empty() && expected == token => {
                Ok(Registration {
                    slot,
                    name: name.clone(),
                    token: expected.clone(),
                })
            }
            _ => Err(DraftError::ReclaimRejected(slot)),
        }
    }

    /// Set the team count. Returns `true` when existing registrations were
    /// discarded because the count changed.
    pub fn configure(&mut self, total: usize) -> Result<bool, DraftError> {
        if total < self.teams.len() {
            return Err(DraftError::InvalidResize {
                requested: total,
                registered: self.teams.len(),
            });
        }
        if self.total == Some(total) {
            return Ok(false);
        }
        let cleared = !self.teams.is_empty();
        self.teams.clear();
        self.tokens.clear();
        self.total = Some(total);
        Ok(cleared)
    }

    /// Drop every registration. The team count is kept.
    pub fn reset(&mut self) {
        self.teams.clear();
        self.tokens.clear();
    }

    /// Forget the team count along with any registrations.
    pub fn unconfigure(&mut self) {
        self.teams.clear();
        self.tokens.clear();
        self.total = None;
    }

    pub fn total(&self) -> Option<usize> {
        self.total
    }

    pub fn len(&self) -> usize {
        self.teams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.teams.is_empty()
    }

    /// Whether every configured slot is bound.
    pub fn is_full(&self) -> bool {
        self.total.is_some_and(|t| self.teams.len() >= t)
    }

    pub fn contains(&self, slot: TeamSlot) -> bool {
        self.teams.contains_key(&slot)
    }

    pub fn name(&self, slot: TeamSlot) -> Option<&str> {
        self.teams.get(&slot).map(String::as_str)
    }

    pub fn slot_of(&self, name: &str) -> Option<TeamSlot> {
        self.teams
            .iter()
            .find(|(_, n)| n.as_str() == name)
            .map(|(s, _)| *s)
    }

    pub fn teams(&self) -> &BTreeMap<TeamSlot, String> {
        &self.teams
    }

    /// Reclaim tokens by slot, for persistence only.
    pub fn tokens(&self) -> &BTreeMap<TeamSlot, String> {
        &self.tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(n: u32) -> TeamSlot {
        TeamSlot::new(n).unwrap()
    }

    fn configured(total: usize) -> TeamRegistry {
        let mut reg = TeamRegistry::new();
        reg.configure(total).unwrap();
        reg
    }

    fn register(reg: &mut TeamRegistry, name: &str) -> Result<TeamSlot, DraftError> {
        reg.register(name, None).map(|r| r.slot)
    }

    #[test]
    fn slot_zero_is_rejected() {
        assert!(TeamSlot::new(0).is_none());
        assert_eq!(TeamSlot::new(3).map(TeamSlot::get), Some(3));
    }

    #[test]
    fn slot_zero_does_not_deserialize() {
        assert!(serde_json::from_str::<TeamSlot>("0").is_err());
        assert_eq!(serde_json::from_str::<TeamSlot>("4").unwrap(), slot(4));
        assert_eq!(serde_json::to_string(&slot(4)).unwrap(), "4");

        let keyed: BTreeMap<TeamSlot, String> =
            serde_json::from_str(r#"{"2": "Bob"}"#).unwrap();
        assert_eq!(keyed[&slot(2)], "Bob");
        assert!(serde_json::from_str::<BTreeMap<TeamSlot, String>>(r#"{"0": "Nobody"}"#).is_err());
    }

    #[test]
    fn slots_assigned_in_order_and_unique() {
        let mut reg = configured(4);
        let slots: Vec<_> = ["Alpha", "Bravo", "Charlie", "Delta"]
            .iter()
            .map(|n| register(&mut reg, n).unwrap())
            .collect();
        assert_eq!(slots, vec![slot(1), slot(2), slot(3), slot(4)]);
        assert!(reg.is_full());
    }

    #[test]
    fn each_registration_gets_its_own_token() {
        let mut reg = configured(2);
        let a = reg.register("Alpha", None).unwrap();
        let b = reg.register("Bob", None).unwrap();
        assert_eq!(a.name, "Alpha");
        assert_eq!(a.token.len(), 32);
        assert_ne!(a.token, b.token);
        assert_eq!(reg.tokens()[&a.slot], a.token);
    }

    #[test]
    fn register_without_team_count_fails() {
        let mut reg = TeamRegistry::new();
        assert_eq!(register(&mut reg, "Alpha"), Err(DraftError::TeamCountUnset));
    }

    #[test]
    fn blank_name_is_a_validation_error() {
        let mut reg = configured(2);
        let err = reg.register("   ", None).unwrap_err();
        assert!(matches!(err, DraftError::Validation { field: "name", .. }));
        assert!(reg.is_empty());
    }

    #[test]
    fn names_are_trimmed() {
        let mut reg = configured(2);
        let s = register(&mut reg, "  Alpha ").unwrap();
        assert_eq!(reg.name(s), Some("Alpha"));
        assert_eq!(
            register(&mut reg, "Alpha"),
            Err(DraftError::DuplicateName("Alpha".into()))
        );
    }

    #[test]
    fn register_beyond_total_fails_without_overwriting() {
        let mut reg = configured(2);
        register(&mut reg, "Alpha").unwrap();
        register(&mut reg, "Bob").unwrap();
        assert_eq!(register(&mut reg, "Carol"), Err(DraftError::SlotsExhausted(2)));
        assert_eq!(reg.name(slot(1)), Some("Alpha"));
        assert_eq!(reg.name(slot(2)), Some("Bob"));
    }

    #[test]
    fn reclaim_with_token_is_idempotent() {
        let mut reg = configured(2);
        let alpha = reg.register("Alpha", None).unwrap();
        register(&mut reg, "Bob").unwrap();
        // Registry is full, but the owner can still recover its slot.
        let again = reg
            .register("Alpha", Some((alpha.slot, alpha.token.as_str())))
            .unwrap();
        assert_eq!(again, alpha);
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn reclaim_without_the_token_is_refused() {
        let mut reg = configured(2);
        let alpha = reg.register("Alpha", None).unwrap();
        let bob = reg.register("Bob", None).unwrap();

        // Knowing the public name and slot is not enough.
        for token in ["", "guess", bob.token.as_str()] {
            assert_eq!(
                reg.register("Alpha", Some((alpha.slot, token))),
                Err(DraftError::ReclaimRejected(alpha.slot))
            );
        }
        assert_eq!(
            reg.register("Carol", Some((slot(3), alpha.token.as_str()))),
            Err(DraftError::ReclaimRejected(slot(3)))
        );
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn tokens_do_not_survive_a_reset() {
        let mut reg = configured(1);
        let solo = reg.register("Solo", None).unwrap();
        reg.reset();
        assert!(reg.tokens().is_empty());
        assert_eq!(
            reg.register("Solo", Some((solo.slot, solo.token.as_str()))),
            Err(DraftError::ReclaimRejected(solo.slot))
        );
        let fresh = reg.register("Solo", None).unwrap();
        assert_ne!(fresh.token, solo.token);
    }

    #[test]
    fn freed_slot_is_reused_smallest_first() {
        let mut reg = TeamRegistry::from_parts(
            Some(3),
            BTreeMap::from([(slot(1), "Alpha".into()), (slot(3), "Charlie".into())]),
            BTreeMap::new(),
        )
        .unwrap();
        assert_eq!(register(&mut reg, "Bravo"), Ok(slot(2)));
    }

    #[test]
    fn from_parts_keeps_tokens_of_registered_slots_only() {
        let mut reg = TeamRegistry::from_parts(
            Some(2),
            BTreeMap::from([(slot(1), "Alpha".into())]),
            BTreeMap::from([(slot(1), "t1".into()), (slot(2), "stale".into())]),
        )
        .unwrap();
        assert_eq!(reg.tokens(), &BTreeMap::from([(slot(1), "t1".to_string())]));
        assert_eq!(reg.register("Alpha", Some((slot(1), "t1"))).unwrap().slot, slot(1));
    }

    #[test]
    fn configure_smaller_than_registered_fails() {
        let mut reg = configured(3);
        register(&mut reg, "Alpha").unwrap();
        register(&mut reg, "Bob").unwrap();
        assert_eq!(
            reg.configure(1),
            Err(DraftError::InvalidResize {
                requested: 1,
                registered: 2
            })
        );
        assert_eq!(reg.total(), Some(3));
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn configure_same_value_keeps_registrations() {
        let mut reg = configured(3);
        register(&mut reg, "Alpha").unwrap();
        assert_eq!(reg.configure(3), Ok(false));
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.tokens().len(), 1);
    }

    #[test]
    fn configure_new_value_clears_registrations() {
        let mut reg = configured(3);
        register(&mut reg, "Alpha").unwrap();
        assert_eq!(reg.configure(4), Ok(true));
        assert!(reg.is_empty());
        assert!(reg.tokens().is_empty());
        assert_eq!(reg.total(), Some(4));
    }

    #[test]
    fn reset_and_unconfigure() {
        let mut reg = configured(2);
        register(&mut reg, "Alpha").unwrap();
        reg.reset();
        assert!(reg.is_empty());
        assert_eq!(reg.total(), Some(2));
        reg.unconfigure();
        assert_eq!(reg.total(), None);
    }

    #[test]
    fn from_parts_rejects_out_of_range_slot() {
        let err = TeamRegistry::from_parts(
            Some(2),
            BTreeMap::from([(slot(5), "X".into())]),
            BTreeMap::new(),
        )
        .unwrap_err();
        assert!(matches!(err, DraftError::Validation { field: "registered_teams", .. }));
    }

    #[test]
    fn from_parts_rejects_duplicate_names() {
        let err = TeamRegistry::from_parts(
            Some(2),
            BTreeMap::from([(slot(1), "X".into()), (slot(2), "X".into())]),
            BTreeMap::new(),
        )
        .unwrap_err();
        assert!(matches!(err, DraftError::Validation { .. }));
    }

    #[test]
    fn from_parts_rejects_teams_without_count() {
        let err = TeamRegistry::from_parts(
            None,
            BTreeMap::from([(slot(1), "X".into())]),
            BTreeMap::new(),
        )
        .unwrap_err();
        assert!(matches!(err, DraftError::Validation { .. }));
    }
}
