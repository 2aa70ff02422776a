//! Transition table runtime
//!
//! A state machine is a list of rules keyed by transition type and source
//! state. Each rule carries an ordered conjunction of named guard predicates,
//! a destination and an action tag interpreted by the caller's hooks.
//! Selection is first-match; when nothing matches the run fails closed.

use std::fmt::{Debug, Display};
use thiserror::Error;

/// Errors raised by the runtime itself
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransitionError {
    /// No rule matched the transition type, state and guards
    #[error("no matching transition {transition} from state {state}")]
    NoMatchingTransition {
        /// Transition type that was requested
        transition: String,
        /// State the entity was in
        state: String,
    },

    /// A rule with the same type, overlapping sources and identical guards
    /// was already registered
    #[error("duplicate transition: {0}")]
    DuplicateTransition(String),
}

/// Type family of one state machine.
pub trait Machine: Send + Sync + 'static {
    /// Transition type (the "verb")
    type Type: Copy + Eq + Debug + Display + Send + Sync;
    /// Entity state
    type State: Copy + Eq + Debug + Display + Send + Sync;
    /// Evaluation context handed to guards and hooks
    type Context: Send + Sync;
    /// Action tag carried by each rule
    type Action: Clone + Debug + Send + Sync;
}

/// A named pure predicate over the evaluation context.
pub struct Predicate<C> {
    name: &'static str,
    check: fn(&C) -> bool,
    negate: bool,
}

impl<C> Predicate<C> {
    /// Named predicate backed by `check`
    pub const fn new(name: &'static str, check: fn(&C) -> bool) -> Self {
        Self {
            name,
            check,
            negate: false,
        }
    }

    /// Logical negation of this predicate
    #[must_use]
    pub const fn not(self) -> Self {
        Self {
            name: self.name,
            check: self.check,
            negate: !self.negate,
        }
    }

    /// Evaluate against `ctx`, honouring negation
    pub fn eval(&self, ctx: &C) -> bool {
        (self.check)(ctx) != self.negate
    }

    /// Name of the underlying check, without negation
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// True when built through [`Predicate::not`]
    pub fn is_negated(&self) -> bool {
        self.negate
    }
}

impl<C> Clone for Predicate<C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C> Copy for Predicate<C> {}

impl<C> Debug for Predicate<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.negate {
            write!(f, "!{}", self.name)
        } else {
            f.write_str(self.name)
        }
    }
}

/// One row of a transition table.
pub struct TransitionRule<M: Machine> {
    /// Transition type the rule answers to
    pub transition: M::Type,
    /// Source states; `None` stands for "no record yet" (registration)
    pub sources: Vec<Option<M::State>>,
    /// Conjunction, evaluated in order
    pub guards: Vec<Predicate<M::Context>>,
    /// State written when the rule fires
    pub destination: M::State,
    /// Machine specific post-transition work
    pub action: M::Action,
}

impl<M: Machine> Debug for TransitionRule<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransitionRule")
            .field("transition", &self.transition)
            .field("sources", &self.sources)
            .field("guards", &self.guards)
            .field("destination", &self.destination)
            .field("action", &self.action)
            .finish()
    }
}

impl<M: Machine> TransitionRule<M> {
    /// Rule from its parts
    pub fn new(
        transition: M::Type,
        sources: Vec<Option<M::State>>,
        guards: Vec<Predicate<M::Context>>,
        destination: M::State,
        action: M::Action,
    ) -> Self {
        Self {
            transition,
            sources,
            guards,
            destination,
            action,
        }
    }

    /// True when the type and source match and every guard holds
    pub fn accepts(&self, transition: M::Type, current: Option<M::State>, ctx: &M::Context) -> bool {
        self.transition == transition
            && self.sources.contains(&current)
            && self.guards.iter().all(|g| g.eval(ctx))
    }

    fn same_guards(&self, other: &Self) -> bool {
        self.guards.len() == other.guards.len()
            && self
                .guards
                .iter()
                .zip(&other.guards)
                .all(|(a, b)| a.name() == b.name() && a.is_negated() == b.is_negated())
    }

    fn describe(&self) -> String {
        format!(
            "{} {:?} {:?} -> {}",
            self.transition, self.sources, self.guards, self.destination
        )
    }
}

/// Hooks invoked around the selected rule.
///
/// `before` derives state without side effects, `action` persists the
/// destination and `after` emits events and metrics. An error from `before`
/// or `action` aborts the run; `after` cannot fail.
#[async_trait::async_trait]
pub trait TransitionHooks<M: Machine>: Send + Sync {
    type Output: Send;
    type Error: From<TransitionError> + Send;

    async fn before(&self, _ctx: &mut M::Context, _rule: &TransitionRule<M>) -> Result<(), Self::Error> {
        Ok(())
    }

    async fn action(
        &self,
        ctx: &mut M::Context,
        current: Option<M::State>,
        rule: &TransitionRule<M>,
    ) -> Result<Self::Output, Self::Error>;

    async fn after(&self, _ctx: &M::Context, _current: Option<M::State>, _rule: &TransitionRule<M>, _output: &Self::Output) {}
}

/// Ordered set of transition rules for one machine.
pub struct TransitionTable<M: Machine> {
    rules: Vec<TransitionRule<M>>,
}

impl<M: Machine> Debug for TransitionTable<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransitionTable").field("rules", &self.rules).finish()
    }
}

impl<M: Machine> Default for TransitionTable<M> {
    fn default() -> Self {
        Self { rules: Vec::new() }
    }
}

impl<M: Machine> TransitionTable<M> {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a rule, rejecting exact duplicates
    pub fn register(&mut self, rule: TransitionRule<M>) -> Result<(), TransitionError> {
        let duplicate = self.rules.iter().any(|existing| {
            existing.transition == rule.transition
                && existing.sources.iter().any(|s| rule.sources.contains(s))
                && existing.same_guards(&rule)
        });
        if duplicate {
            return Err(TransitionError::DuplicateTransition(rule.describe()));
        }
        self.rules.push(rule);
        Ok(())
    }

    /// Registered rules in registration order
    pub fn rules(&self) -> &[TransitionRule<M>] {
        &self.rules
    }

    /// First rule accepting the transition, state and context
    pub fn select(
        &self,
        transition: M::Type,
        current: Option<M::State>,
        ctx: &M::Context,
    ) -> Result<&TransitionRule<M>, TransitionError> {
        self.rules
            .iter()
            .find(|rule| rule.accepts(transition, current, ctx))
            .ok_or_else(|| TransitionError::NoMatchingTransition {
                transition: transition.to_string(),
                state: current.map_or_else(|| "none".to_string(), |s| s.to_string()),
            })
    }

    /// Indices of every rule accepting the input; more than one means the
    /// guards of those rules are not mutually exclusive
    pub fn matching(&self, transition: M::Type, current: Option<M::State>, ctx: &M::Context) -> Vec<usize> {
        self.rules
            .iter()
            .enumerate()
            .filter(|(_, rule)| rule.accepts(transition, current, ctx))
            .map(|(i, _)| i)
            .collect()
    }

    /// Select a rule and drive it through the hooks
    pub async fn run<H>(
        &self,
        transition: M::Type,
        current: Option<M::State>,
        ctx: &mut M::Context,
        hooks: &H,
    ) -> Result<H::Output, H::Error>
    where
        H: TransitionHooks<M>,
    {
        let rule = self.select(transition, current, ctx)?;
        hooks.before(ctx, rule).await?;
        let output = hooks.action(ctx, current, rule).await?;
        hooks.after(ctx, current, rule, &output).await;
        Ok(output)
    }
}
