use std::collections::BTreeMap;

/// O1's first label: stamped on every child resource the agent creates.
pub const CREATED_BY_AGENT: &str = "formance.com/created-by-agent";
/// O1's second label: which stack a child belongs to.
pub const STACK: &str = "formance.com/stack";

/// The label selector used to find all children the agent owns for a stack,
/// the one `delete_module`/`sync_category` list against.
pub fn selector(stack_name: &str) -> String {
    format!("{CREATED_BY_AGENT}=true,{STACK}={stack_name}")
}

/// The labels a freshly created child must carry (O1).
pub fn child_labels(stack_name: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(CREATED_BY_AGENT.to_string(), "true".to_string());
    labels.insert(STACK.to_string(), stack_name.to_string());
    labels
}

/// Reads the `stack` label off an object, used to attribute informer events
/// (which carry no other hint about which stack a child belongs to) back to
/// a stack name.
pub fn stack_of(labels: Option<&std::collections::BTreeMap<String, String>>) -> Option<String> {
    labels?.get(STACK).cloned()
}
