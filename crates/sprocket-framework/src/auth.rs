//! Authorization gate.
//!
//! A [`Command`](crate::handler::Command) declares an ordered list of
//! [`Requirement`]s. The [`AuthorizationGate`] evaluates them as a logical AND
//! in declaration order and stops at the first failure: later requirements are
//! never evaluated, so a requirement may rely on every earlier one having
//! passed. Evaluation is pure and never touches framework state.

use std::fmt;
use std::sync::Arc;

use sprocket_core::{Permissions, Request, UserId};
use tracing::debug;

/// Result of evaluating a request against a command's requirements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny { reason: String },
}

impl Decision {
    pub fn deny(reason: impl Into<String>) -> Self {
        Self::Deny {
            reason: reason.into(),
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// What a requirement gets to look at.
#[derive(Debug, Clone, Copy)]
pub struct AuthContext<'a> {
    pub request: &'a Request,
    /// The single designated owner of the bot.
    pub owner: UserId,
}

/// A single authorization check.
pub trait Requirement: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    fn check(&self, ctx: &AuthContext<'_>) -> Decision;
}

impl fmt::Debug for dyn Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Requirement({})", self.name())
    }
}

// =============================================================================
// Built-in requirements
// =============================================================================

/// The invoking identity must be the configured owner.
#[derive(Debug, Clone, Copy, Default)]
pub struct OwnerOnly;

impl Requirement for OwnerOnly {
    fn name(&self) -> &str {
        "owner_only"
    }

    fn check(&self, ctx: &AuthContext<'_>) -> Decision {
        if ctx.request.identity().user_id == ctx.owner {
            Decision::Allow
        } else {
            Decision::deny("You are not authorized to use this command.")
        }
    }
}

/// The invoking identity must hold every listed permission.
#[derive(Debug, Clone, Copy)]
pub struct HasPermissions(pub Permissions);

impl Requirement for HasPermissions {
    fn name(&self) -> &str {
        "has_permissions"
    }

    fn check(&self, ctx: &AuthContext<'_>) -> Decision {
        let held = ctx.request.identity().permissions;
        if held.satisfies(self.0) {
            return Decision::Allow;
        }
        Decision::deny(format!(
            "You are missing the following permissions: {}.",
            held.missing(self.0).labels().join(", ")
        ))
    }
}

/// The command must be invoked inside a guild.
#[derive(Debug, Clone, Copy, Default)]
pub struct GuildOnly;

impl Requirement for GuildOnly {
    fn name(&self) -> &str {
        "guild_only"
    }

    fn check(&self, ctx: &AuthContext<'_>) -> Decision {
        if ctx.request.scope().is_direct() {
            Decision::deny("This command cannot be used in direct messages.")
        } else {
            Decision::Allow
        }
    }
}

/// The invoking identity must not be a bot account.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotBot;

impl Requirement for NotBot {
    fn name(&self) -> &str {
        "not_bot"
    }

    fn check(&self, ctx: &AuthContext<'_>) -> Decision {
        if ctx.request.identity().is_bot {
            Decision::deny("Bots cannot use this command.")
        } else {
            Decision::Allow
        }
    }
}

/// A requirement backed by a closure.
pub struct RequirementFn<F> {
    name: String,
    f: F,
}

impl<F> Requirement for RequirementFn<F>
where
    F: Fn(&AuthContext<'_>) -> Decision + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn check(&self, ctx: &AuthContext<'_>) -> Decision {
        (self.f)(ctx)
    }
}

/// Creates a requirement from a closure.
pub fn requirement_fn<F>(name: impl Into<String>, f: F) -> RequirementFn<F>
where
    F: Fn(&AuthContext<'_>) -> Decision + Send + Sync,
{
    RequirementFn {
        name: name.into(),
        f,
    }
}

// =============================================================================
// Gate
// =============================================================================

/// Evaluates requirements against requests.
#[derive(Debug, Clone, Copy)]
pub struct AuthorizationGate {
    owner: UserId,
}

impl AuthorizationGate {
    pub fn new(owner: UserId) -> Self {
        Self { owner }
    }

    pub fn owner(&self) -> UserId {
        self.owner
    }

    /// Returns the first failing requirement's decision, or `Allow`.
    pub fn check(&self, request: &Request, requirements: &[Arc<dyn Requirement>]) -> Decision {
        let ctx = AuthContext {
            request,
            owner: self.owner,
        };
        for requirement in requirements {
            let decision = requirement.check(&ctx);
            if !decision.is_allowed() {
                debug!(
                    requirement = requirement.name(),
                    user = %request.identity().user_id,
                    "Requirement not met"
                );
                return decision;
            }
        }
        Decision::Allow
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use sprocket_core::Identity;

    use super::*;

    fn request(user: u64) -> Request {
        Request::builder("ban")
            .identity(Identity::new(user, "someone"))
            .in_guild(1, 2)
            .build()
    }

    #[test]
    fn stops_at_first_failure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let requirements: Vec<Arc<dyn Requirement>> = vec![
            Arc::new(requirement_fn("a", |_| Decision::Allow)),
            Arc::new(requirement_fn("b", |_| Decision::deny("b failed"))),
            Arc::new(requirement_fn("c", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Decision::Allow
            })),
        ];

        let gate = AuthorizationGate::new(UserId(1));
        assert_eq!(
            gate.check(&request(5), &requirements),
            Decision::deny("b failed")
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn owner_only() {
        let gate = AuthorizationGate::new(UserId(42));
        let requirements: Vec<Arc<dyn Requirement>> = vec![Arc::new(OwnerOnly)];

        assert!(gate.check(&request(42), &requirements).is_allowed());
        assert_eq!(
            gate.check(&request(7), &requirements),
            Decision::deny("You are not authorized to use this command.")
        );
    }

    #[test]
    fn permissions_list_missing_labels() {
        let gate = AuthorizationGate::new(UserId(1));
        let requirements: Vec<Arc<dyn Requirement>> = vec![Arc::new(HasPermissions(
            Permissions::BAN_MEMBERS | Permissions::KICK_MEMBERS,
        ))];

        let moderator = Request::builder("ban")
            .identity(Identity::new(5, "mod").with_permissions(Permissions::KICK_MEMBERS))
            .build();
        assert_eq!(
            gate.check(&moderator, &requirements),
            Decision::deny("You are missing the following permissions: Ban Members.")
        );

        let admin = Request::builder("ban")
            .identity(Identity::new(6, "admin").with_permissions(Permissions::ADMINISTRATOR))
            .build();
        assert!(gate.check(&admin, &requirements).is_allowed());
    }

    #[test]
    fn guild_only_rejects_direct_messages() {
        let gate = AuthorizationGate::new(UserId(1));
        let requirements: Vec<Arc<dyn Requirement>> = vec![Arc::new(GuildOnly)];

        let dm = Request::builder("kick").build();
        assert_eq!(
            gate.check(&dm, &requirements),
            Decision::deny("This command cannot be used in direct messages.")
        );
        assert!(gate.check(&request(5), &requirements).is_allowed());
    }

    #[test]
    fn empty_requirements_allow() {
        let gate = AuthorizationGate::new(UserId(1));
        assert!(gate.check(&request(9), &[]).is_allowed());
    }
}
