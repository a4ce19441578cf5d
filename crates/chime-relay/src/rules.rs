//! Ordered keyword rules for classifying free-text commands.

/// One classification rule: a set of keywords and a canned response.
#[derive(Clone, Debug)]
pub struct CommandRule {
    /// Stable name for logs and the `chime_commands_total` label.
    pub name: String,
    keywords: Vec<String>,
    response: String,
}

impl CommandRule {
    /// Build a rule. Keywords are matched case-insensitively as substrings.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        keywords: &[&str],
        response: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
            response: response.into(),
        }
    }

    /// Whether any keyword occurs in the command.
    #[must_use]
    pub fn matches(&self, command: &str) -> bool {
        let lowered = command.to_lowercase();
        self.keywords.iter().any(|k| lowered.contains(k))
    }

    /// The canned response text.
    #[must_use]
    pub fn response(&self) -> &str {
        &self.response
    }
}

/// Result of classifying one command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Classification<'a> {
    /// Name of the matched rule, or `"fallback"`.
    pub rule: &'a str,
    /// Response text to send back.
    pub response: &'a str,
}

/// An ordered rule list evaluated first-match-wins.
///
/// The table is plain data: embedders and tests build their own with
/// [`RuleTable::new`]; the relay defaults to the marketplace set.
#[derive(Clone, Debug)]
pub struct RuleTable {
    rules: Vec<CommandRule>,
    fallback: String,
}

impl RuleTable {
    /// Build a table from rules in priority order and a fallback response.
    #[must_use]
    pub fn new(rules: Vec<CommandRule>, fallback: impl Into<String>) -> Self {
        Self {
            rules,
            fallback: fallback.into(),
        }
    }

    /// The built-in marketplace rule set.
    #[must_use]
    pub fn marketplace() -> Self {
        Self::new(
            vec![
                CommandRule::new(
                    "rfq_list",
                    &["rfq", "request for quote"],
                    "Here is your RFQ list: 3 open requests awaiting supplier quotes.",
                ),
                CommandRule::new(
                    "suppliers",
                    &["supplier", "vendor"],
                    "Top matched suppliers: 5 verified partners are ready to quote.",
                ),
                CommandRule::new(
                    "orders",
                    &["order", "shipment", "delivery"],
                    "You have 2 orders in transit and 1 awaiting dispatch.",
                ),
                CommandRule::new(
                    "wallet",
                    &["wallet", "balance", "payment"],
                    "Your wallet balance is settled; no payments are pending.",
                ),
                CommandRule::new(
                    "help",
                    &["help", "what can you"],
                    "Try: show rfqs, find suppliers, track orders, check wallet.",
                ),
            ],
            "Sorry, I didn't catch that. Say 'help' to hear what I can do.",
        )
    }

    /// Classify a command against the rules in order.
    #[must_use]
    pub fn classify(&self, command: &str) -> Classification<'_> {
        for rule in &self.rules {
            if rule.matches(command) {
                return Classification {
                    rule: &rule.name,
                    response: rule.response(),
                };
            }
        }
        Classification {
            rule: "fallback",
            response: &self.fallback,
        }
    }

    /// Number of rules (excluding the fallback).
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether the table has no rules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl Default for RuleTable {
    fn default() -> Self {
        Self::marketplace()
    }
}
