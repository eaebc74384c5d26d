//! Member directory and tier resolution.
//!
//! Tiers are resolved by role identifier first, in priority order: ranked
//! tiers by descending rank, then Gold, then Mid. Role-name matching is a
//! separate degraded-mode capability that only runs when installed and
//! when no identifier matched.

use std::collections::HashMap;

use shiftclock_core::config::{CreditTable, MemberConfig};
use shiftclock_core::{MemberFacts, ShiftClockConfig, Tier, UserId};

/// A role held by a member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Role {
    pub id: u64,
    pub name: String,
}

/// A chat-platform member as seen by the tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub id: UserId,
    pub name: String,
    pub bot: bool,
    pub roles: Vec<Role>,
}

impl Member {
    pub fn facts(&self) -> MemberFacts {
        MemberFacts {
            is_bot: self.bot,
            role_ids: self.roles.iter().map(|r| r.id).collect(),
        }
    }
}

/// Looks members up by id.
pub trait MemberDirectory: Send + Sync {
    fn member(&self, id: UserId) -> Option<Member>;
}

/// Directory built from `[[members]]` in config.
#[derive(Debug, Default)]
pub struct StaticDirectory {
    members: HashMap<UserId, Member>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(members: &[MemberConfig]) -> Self {
        let mut dir = Self::new();
        for m in members {
            dir.insert(Member {
                id: UserId(m.id),
                name: m.name.clone(),
                bot: m.bot,
                roles: m
                    .roles
                    .iter()
                    .map(|r| Role { id: r.id, name: r.name.clone() })
                    .collect(),
            });
        }
        dir
    }

    pub fn insert(&mut self, member: Member) {
        self.members.insert(member.id, member);
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

impl MemberDirectory for StaticDirectory {
    fn member(&self, id: UserId) -> Option<Member> {
        self.members.get(&id).cloned()
    }
}

/// One entry of the resolution order.
#[derive(Debug, Clone)]
pub struct TierRule {
    pub role_id: Option<u64>,
    pub tier: Tier,
    pub aliases: Vec<String>,
}

/// Degraded-mode tier lookup used when no role identifier matched.
pub trait TierFallback: Send + Sync {
    fn name(&self) -> &str;
    fn resolve(&self, roles: &[Role], rules: &[TierRule]) -> Option<Tier>;
}

/// Matches role names against each tier's configured aliases.
#[derive(Debug, Default)]
pub struct AliasFallback;

fn normalize(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

impl TierFallback for AliasFallback {
    fn name(&self) -> &str {
        "role-name aliases"
    }

    fn resolve(&self, roles: &[Role], rules: &[TierRule]) -> Option<Tier> {
        let names: Vec<String> = roles.iter().map(|r| normalize(&r.name)).collect();
        rules.iter().find_map(|rule| {
            let hit = rule.aliases.iter().map(|a| normalize(a)).any(|alias| {
                !alias.is_empty() && names.iter().any(|n| n.contains(&alias))
            });
            hit.then(|| rule.tier.clone())
        })
    }
}

/// Role → tier resolution.
pub struct TierResolver {
    table: CreditTable,
    /// Highest priority first.
    rules: Vec<TierRule>,
    fallback: Option<Box<dyn TierFallback>>,
}

impl TierResolver {
    pub fn new(table: CreditTable) -> Self {
        let mut ranked: Vec<_> = table.ranked.iter().collect();
        ranked.sort_by(|(an, a), (bn, b)| b.rank.cmp(&a.rank).then_with(|| an.cmp(bn)));

        let mut rules: Vec<TierRule> = ranked
            .into_iter()
            .map(|(name, t)| {
                let mut aliases = t.aliases.clone();
                aliases.push(name.clone());
                TierRule {
                    role_id: t.role_id,
                    tier: Tier::Ranked(name.clone()),
                    aliases,
                }
            })
            .collect();
        rules.push(TierRule {
            role_id: table.gold.role_id,
            tier: Tier::Gold,
            aliases: table.gold.aliases.clone(),
        });
        rules.push(TierRule {
            role_id: table.mid.role_id,
            tier: Tier::Mid,
            aliases: table.mid.aliases.clone(),
        });

        Self {
            table,
            rules,
            fallback: None,
        }
    }

    pub fn with_fallback(mut self, fallback: Box<dyn TierFallback>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn from_config(config: &ShiftClockConfig) -> Self {
        let resolver = Self::new(config.credits.clone());
        if config.directory.name_fallback {
            tracing::warn!("⚠️ Role-name fallback enabled; tiers may be matched by name");
            resolver.with_fallback(Box::new(AliasFallback))
        } else {
            resolver
        }
    }

    pub fn table(&self) -> &CreditTable {
        &self.table
    }

    /// Tier for a member; unknown members are Recruit.
    pub fn resolve(&self, member: Option<&Member>) -> Tier {
        let Some(member) = member else {
            return Tier::Recruit;
        };

        let by_id = self.rules.iter().find_map(|rule| {
            rule.role_id
                .filter(|id| member.roles.iter().any(|r| r.id == *id))
                .map(|_| rule.tier.clone())
        });
        if let Some(tier) = by_id {
            return tier;
        }

        if let Some(fallback) = &self.fallback {
            if let Some(tier) = fallback.resolve(&member.roles, &self.rules) {
                tracing::warn!(
                    "⚠️ Tier for {} ({}) resolved by {}: {tier}",
                    member.name,
                    member.id,
                    fallback.name()
                );
                return tier;
            }
        }
        Tier::Recruit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shiftclock_core::config::{DailyReset, RankedTier};

    fn ranked(role_id: u64, rank: u8, aliases: &[&str]) -> RankedTier {
        RankedTier {
            role_id: Some(role_id),
            credits_per_hour: 5.0,
            rank,
            display_name: None,
            aliases: aliases.iter().map(|s| s.to_string()).collect(),
            daily_reset: DailyReset::ZeroTime,
        }
    }

    fn table() -> CreditTable {
        let mut t = CreditTable::default();
        t.gold.role_id = Some(100);
        t.mid.role_id = Some(200);
        t.ranked.insert("altos".into(), ranked(301, 1, &["alto"]));
        t.ranked.insert("supremos".into(), ranked(305, 5, &["supremo"]));
        t
    }

    fn member(roles: &[(u64, &str)]) -> Member {
        Member {
            id: UserId(1),
            name: "ana".into(),
            bot: false,
            roles: roles.iter().map(|(id, n)| Role { id: *id, name: n.to_string() }).collect(),
        }
    }

    #[test]
    fn test_identifier_priority() {
        let r = TierResolver::new(table());
        assert_eq!(r.resolve(Some(&member(&[(200, ""), (100, "")]))), Tier::Gold);
        assert_eq!(r.resolve(Some(&member(&[(100, ""), (301, "")]))), Tier::Ranked("altos".into()));
        assert_eq!(
            r.resolve(Some(&member(&[(301, ""), (305, "")]))),
            Tier::Ranked("supremos".into())
        );
        assert_eq!(r.resolve(None), Tier::Recruit);
    }

    #[test]
    fn test_name_matching_only_with_fallback() {
        let m = member(&[(999, "[⭐]  Supremos")]);
        assert_eq!(TierResolver::new(table()).resolve(Some(&m)), Tier::Recruit);
        let r = TierResolver::new(table()).with_fallback(Box::new(AliasFallback));
        assert_eq!(r.resolve(Some(&m)), Tier::Ranked("supremos".into()));
        let gold = member(&[(998, "🟡 GOLD")]);
        assert_eq!(r.resolve(Some(&gold)), Tier::Gold);
    }

    #[test]
    fn test_id_match_beats_name_match() {
        let r = TierResolver::new(table()).with_fallback(Box::new(AliasFallback));
        let m = member(&[(200, "whatever"), (999, "supremos")]);
        assert_eq!(r.resolve(Some(&m)), Tier::Mid);
    }
}
