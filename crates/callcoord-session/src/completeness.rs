use callcoord_core::{AgentConfig, CollectedData};

/// Data-collection progress of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completeness {
    /// The agent declares no fields, so nothing gates the close.
    NotApplicable,
    /// At least one required field has no value yet.
    Incomplete,
    /// Every required field has a value.
    Complete,
}

impl Completeness {
    /// Evaluate `collected` against the agent's field specs.
    ///
    /// Only presence of the key is checked; value validation belongs to extraction.
    pub fn evaluate(agent: &AgentConfig, collected: &CollectedData) -> Self {
        if agent.data_to_fill.is_empty() {
            return Completeness::NotApplicable;
        }
        if agent
            .required_fields()
            .all(|name| collected.contains_key(name))
        {
            Completeness::Complete
        } else {
            Completeness::Incomplete
        }
    }

    /// Whether a no-input timeout may use the courtesy close.
    pub fn allows_courtesy_close(self) -> bool {
        matches!(self, Completeness::Complete | Completeness::NotApplicable)
    }
}

/// True only when fields are declared and every required one is collected.
pub fn is_complete(agent: &AgentConfig, collected: &CollectedData) -> bool {
    Completeness::evaluate(agent, collected) == Completeness::Complete
}

/// Required fields still missing, in field-name order.
pub fn missing_required_fields(agent: &AgentConfig, collected: &CollectedData) -> Vec<String> {
    agent
        .required_fields()
        .filter(|name| !collected.contains_key(*name))
        .map(str::to_owned)
        .collect()
}
