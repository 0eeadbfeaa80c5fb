use std::collections::{HashMap, HashSet};

/// Transitive closure of dependencies, excluding the start node. Iterative so
/// pathological graphs cannot blow the stack.
pub(crate) fn transitive_chain(forward: &HashMap<String, Vec<String>>, start: &str) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut chain = Vec::new();
    let mut stack: Vec<String> = forward.get(start).cloned().unwrap_or_default();
    while let Some(id) = stack.pop() {
        if !seen.insert(id.clone()) {
            continue;
        }
        if let Some(next) = forward.get(&id) {
            stack.extend(next.iter().cloned());
        }
        chain.push(id);
    }
    chain
}

pub(crate) fn add_edge(
    forward: &mut HashMap<String, Vec<String>>,
    reverse: &mut HashMap<String, Vec<String>>,
    task_id: &str,
    depends_on: &str,
) {
    let deps = forward.entry(task_id.to_string()).or_default();
    if !deps.iter().any(|d| d == depends_on) {
        deps.push(depends_on.to_string());
    }
    let dependents = reverse.entry(depends_on.to_string()).or_default();
    if !dependents.iter().any(|d| d == task_id) {
        dependents.push(task_id.to_string());
    }
}

pub(crate) fn remove_edge(
    forward: &mut HashMap<String, Vec<String>>,
    reverse: &mut HashMap<String, Vec<String>>,
    task_id: &str,
    depends_on: &str,
) {
    if let Some(deps) = forward.get_mut(task_id) {
        deps.retain(|d| d != depends_on);
        if deps.is_empty() {
            forward.remove(task_id);
        }
    }
    if let Some(dependents) = reverse.get_mut(depends_on) {
        dependents.retain(|d| d != task_id);
        if dependents.is_empty() {
            reverse.remove(depends_on);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_is_transitive_and_excludes_start() {
        let mut forward = HashMap::new();
        let mut reverse = HashMap::new();
        add_edge(&mut forward, &mut reverse, "a", "b");
        add_edge(&mut forward, &mut reverse, "b", "c");
        add_edge(&mut forward, &mut reverse, "a", "d");

        let mut chain = transitive_chain(&forward, "a");
        chain.sort();
        assert_eq!(chain, vec!["b", "c", "d"]);
        assert!(transitive_chain(&forward, "c").is_empty());
    }

    #[test]
    fn add_then_remove_leaves_maps_unchanged() {
        let mut forward = HashMap::new();
        let mut reverse = HashMap::new();
        add_edge(&mut forward, &mut reverse, "a", "b");
        remove_edge(&mut forward, &mut reverse, "a", "b");
        assert!(forward.is_empty());
        assert!(reverse.is_empty());
    }
}
