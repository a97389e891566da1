use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use crate::Error;

/// A single quota: at most `max_count` events within any trailing `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Threshold {
    max_count: NonZeroUsize,
    window: Duration,
}

impl Threshold {
    /// Creates a new `Threshold`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`] if `max_count` is zero or `window` is empty.
    pub fn new(max_count: usize, window: Duration) -> Result<Self, Error> {
        let max_count = NonZeroUsize::new(max_count)
            .ok_or_else(|| Error::invalid("max_count must be at least 1"))?;
        if window.is_zero() {
            return Err(Error::invalid("window must be greater than zero"));
        }
        Ok(Self { max_count, window })
    }

    pub fn max_count(&self) -> NonZeroUsize {
        self.max_count
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

/// The ordered thresholds enforced for one requester.
///
/// Thresholds are evaluated in the order given. An empty set never limits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSet {
    requester: Option<String>,
    thresholds: Vec<Threshold>,
}

impl RuleSet {
    pub fn new(thresholds: impl IntoIterator<Item = Threshold>) -> Self {
        Self {
            requester: None,
            thresholds: thresholds.into_iter().collect(),
        }
    }

    /// The classic single window and limit.
    pub fn single(max_count: usize, window: Duration) -> Result<Self, Error> {
        Ok(Self::new([Threshold::new(max_count, window)?]))
    }

    /// Builds a rule set from `(max_count, window)` pairs, validating each one.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (usize, Duration)>) -> Result<Self, Error> {
        let thresholds = pairs
            .into_iter()
            .enumerate()
            .map(|(index, (max_count, window))| {
                Threshold::new(max_count, window).map_err(|err| match err {
                    Error::InvalidConfiguration { reason } => {
                        Error::invalid(format!("threshold {index}: {reason}"))
                    }
                    other => other,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(thresholds))
    }

    pub fn unlimited() -> Self {
        Self::default()
    }

    /// Binds this rule set to a specific requester id.
    pub fn with_requester(mut self, requester: impl Into<String>) -> Self {
        self.requester = Some(requester.into());
        self
    }

    pub fn requester(&self) -> Option<&str> {
        self.requester.as_deref()
    }

    pub fn thresholds(&self) -> &[Threshold] {
        &self.thresholds
    }

    pub fn len(&self) -> usize {
        self.thresholds.len()
    }

    pub fn is_unlimited(&self) -> bool {
        self.thresholds.is_empty()
    }

    /// The widest window in the set, or zero when unlimited.
    pub fn longest_window(&self) -> Duration {
        self.thresholds
            .iter()
            .map(Threshold::window)
            .max()
            .unwrap_or_default()
    }
}

/// Resolves the rule set that applies to a requester.
///
/// Resolution runs on every check, so implementations should be cheap.
pub trait RuleSource: Send + Sync {
    /// Returns `None` when the requester is not limited at all.
    fn resolve(&self, requester: &str) -> Option<Arc<RuleSet>>;
}

impl<T> RuleSource for Arc<T>
where
    T: RuleSource + ?Sized,
{
    fn resolve(&self, requester: &str) -> Option<Arc<RuleSet>> {
        (**self).resolve(requester)
    }
}

// A shared, reloadable source: swap the inner value under the write lock.
impl<T> RuleSource for RwLock<T>
where
    T: RuleSource,
{
    fn resolve(&self, requester: &str) -> Option<Arc<RuleSet>> {
        self.read().resolve(requester)
    }
}

/// A [`RuleSource`] backed by a lookup function.
pub struct Lookup<F>(F);

/// Resolves rules per requester with `f`.
pub fn lookup<F>(f: F) -> Lookup<F>
where
    F: Fn(&str) -> Option<Arc<RuleSet>> + Send + Sync,
{
    Lookup(f)
}

impl<F> RuleSource for Lookup<F>
where
    F: Fn(&str) -> Option<Arc<RuleSet>> + Send + Sync,
{
    fn resolve(&self, requester: &str) -> Option<Arc<RuleSet>> {
        (self.0)(requester)
    }
}

/// Per-requester rule sets with an optional fallback for everyone else.
#[derive(Debug, Clone, Default)]
pub struct RuleTable {
    requesters: HashMap<String, Arc<RuleSet>>,
    default: Option<Arc<RuleSet>>,
}

impl RuleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// One rule set shared by every requester.
    pub fn shared(rules: RuleSet) -> Self {
        Self::new().with_default(rules)
    }

    pub fn with_default(mut self, rules: RuleSet) -> Self {
        self.default = Some(Arc::new(rules));
        self
    }

    /// Adds or replaces the rule set for `requester`.
    pub fn insert(&mut self, requester: impl Into<String>, rules: RuleSet) {
        let requester = requester.into();
        let rules = rules.with_requester(requester.clone());
        self.requesters.insert(requester, Arc::new(rules));
    }

    /// Builds a table from rule sets. Sets bound to a requester become overrides; the single
    /// unbound set, if any, becomes the default.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`] if more than one set is unbound or a requester
    /// appears twice.
    pub fn from_rule_sets(sets: impl IntoIterator<Item = RuleSet>) -> Result<Self, Error> {
        let mut table = Self::new();
        for set in sets {
            match set.requester().map(str::to_owned) {
                Some(requester) => {
                    if table.requesters.contains_key(&requester) {
                        return Err(Error::invalid(format!(
                            "duplicate rules for requester {requester:?}"
                        )));
                    }
                    table.requesters.insert(requester, Arc::new(set));
                }
                None => {
                    if table.default.is_some() {
                        return Err(Error::invalid("more than one default rule set"));
                    }
                    table.default = Some(Arc::new(set));
                }
            }
        }
        Ok(table)
    }

    pub fn len(&self) -> usize {
        self.requesters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requesters.is_empty() && self.default.is_none()
    }
}

impl From<RuleSet> for RuleTable {
    fn from(rules: RuleSet) -> Self {
        Self::shared(rules)
    }
}

impl RuleSource for RuleTable {
    fn resolve(&self, requester: &str) -> Option<Arc<RuleSet>> {
        self.requesters
            .get(requester)
            .or(self.default.as_ref())
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_rejects_invalid_thresholds() {
        assert!(matches!(
            Threshold::new(0, Duration::from_secs(1)),
            Err(Error::InvalidConfiguration { .. })
        ));
        assert!(matches!(
            Threshold::new(1, Duration::ZERO),
            Err(Error::InvalidConfiguration { .. })
        ));
        assert!(Threshold::new(1, Duration::from_nanos(1)).is_ok());
    }

    #[test]
    fn test_from_pairs_names_the_bad_threshold() {
        let err = RuleSet::from_pairs([(5, Duration::from_secs(60)), (0, Duration::from_secs(5))])
            .unwrap_err();
        assert!(
            err.to_string().contains("threshold 1"),
            "unexpected message: {err}"
        );
    }

    #[test]
    fn test_rule_set_accessors() {
        let rules =
            RuleSet::from_pairs([(5, Duration::from_secs(60)), (1, Duration::from_secs(5))])
                .unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules.longest_window(), Duration::from_secs(60));
        assert_eq!(rules.thresholds()[1].max_count().get(), 1);
        assert!(!rules.is_unlimited());
        assert!(RuleSet::unlimited().is_unlimited());
        assert_eq!(RuleSet::unlimited().longest_window(), Duration::ZERO);
    }

    #[test]
    fn test_table_prefers_requester_rules() {
        let mut table = RuleTable::shared(RuleSet::single(10, Duration::from_secs(1)).unwrap());
        table.insert("vip", RuleSet::single(100, Duration::from_secs(1)).unwrap());

        let vip = table.resolve("vip").unwrap();
        assert_eq!(vip.thresholds()[0].max_count().get(), 100);
        assert_eq!(vip.requester(), Some("vip"));

        let other = table.resolve("anyone").unwrap();
        assert_eq!(other.thresholds()[0].max_count().get(), 10);
    }

    #[test]
    fn test_table_without_default_is_unlimited_for_strangers() {
        let mut table = RuleTable::new();
        table.insert("alice", RuleSet::single(1, Duration::from_secs(1)).unwrap());
        assert!(table.resolve("alice").is_some());
        assert!(table.resolve("bob").is_none());
    }

    #[test]
    fn test_from_rule_sets_rejects_ambiguity() {
        let one = RuleSet::single(1, Duration::from_secs(1)).unwrap();

        let two_defaults = RuleTable::from_rule_sets([one.clone(), one.clone()]);
        assert!(matches!(
            two_defaults,
            Err(Error::InvalidConfiguration { .. })
        ));

        let duplicate = RuleTable::from_rule_sets([
            one.clone().with_requester("a"),
            one.clone().with_requester("a"),
        ]);
        assert!(matches!(duplicate, Err(Error::InvalidConfiguration { .. })));

        let table =
            RuleTable::from_rule_sets([one.clone().with_requester("a"), one.clone()]).unwrap();
        assert_eq!(table.len(), 1);
        assert!(table.resolve("b").is_some());
    }

    #[test]
    fn test_lookup_and_reloadable_sources() {
        let source = lookup(|requester: &str| {
            (requester == "metered")
                .then(|| Arc::new(RuleSet::single(1, Duration::from_secs(1)).unwrap()))
        });
        assert!(source.resolve("metered").is_some());
        assert!(source.resolve("free").is_none());

        let shared = Arc::new(RwLock::new(RuleTable::new()));
        assert!(shared.resolve("x").is_none());
        *shared.write() = RuleTable::shared(RuleSet::single(1, Duration::from_secs(1)).unwrap());
        assert!(shared.resolve("x").is_some());
    }
}
