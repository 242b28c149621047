use std::fmt;
use std::str::FromStr;

/// Optional stages of a collection cycle. Validation always runs and is not listed here.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    SlowQueries,
    IndividualQueries,
    ExecutionPlans,
    WaitEvents,
    BlockingSessions,
}

impl Stage {
    /// Execution order within a cycle.
    pub const ALL: &'static [Self] = &[
        Self::SlowQueries,
        Self::IndividualQueries,
        Self::ExecutionPlans,
        Self::WaitEvents,
        Self::BlockingSessions,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::SlowQueries => "slow_queries",
            Self::IndividualQueries => "individual_queries",
            Self::ExecutionPlans => "execution_plans",
            Self::WaitEvents => "wait_events",
            Self::BlockingSessions => "blocking_sessions",
        }
    }

    #[must_use]
    pub const fn enabled_by_default(self) -> bool {
        true
    }

    /// Stage whose output this stage consumes, if any.
    #[must_use]
    pub const fn depends_on(self) -> Option<Self> {
        match self {
            Self::IndividualQueries => Some(Self::SlowQueries),
            Self::ExecutionPlans => Some(Self::IndividualQueries),
            Self::SlowQueries | Self::WaitEvents | Self::BlockingSessions => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|stage| stage.name() == s)
            .ok_or_else(|| format!("unknown stage: {s}"))
    }
}
