//! Protocol router (§9 Design Notes): exact-match map plus an ordered list of
//! predicate matchers. Exact match always wins; first matching predicate in
//! registration order wins otherwise.

type Predicate = Box<dyn Fn(&str) -> bool + Send + Sync>;

#[derive(Default)]
pub struct Router {
    exact: std::collections::HashMap<String, ()>,
    predicates: Vec<(String, Predicate)>,
}

impl Router {
    pub fn new() -> Self {
        Router { exact: std::collections::HashMap::new(), predicates: Vec::new() }
    }

    pub fn add_handler(&mut self, protocol_id: &str) {
        self.exact.insert(protocol_id.to_string(), ());
    }

    /// `name` is a label for the predicate entry (used by `remove_handler`);
    /// it need not be the candidate string the predicate matches against.
    pub fn add_handler_match<F>(&mut self, name: &str, predicate: F)
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.predicates.push((name.to_string(), Box::new(predicate)));
    }

    pub fn remove_handler(&mut self, protocol_id: &str) {
        self.exact.remove(protocol_id);
        self.predicates.retain(|(name, _)| name != protocol_id);
    }

    pub fn matches(&self, candidate: &str) -> bool {
        if self.exact.contains_key(candidate) {
            return true;
        }
        self.predicates.iter().any(|(_, pred)| pred(candidate))
    }

    /// Exact-match ids only, per §4.11.
    pub fn protocols(&self) -> Vec<String> {
        self.exact.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_wins() {
        let mut router = Router::new();
        router.add_handler("/echo/1.0.0");
        router.add_handler_match("reject-all", |_| false);
        assert!(router.matches("/echo/1.0.0"));
        assert!(!router.matches("/other/1.0.0"));
    }

    #[test]
    fn predicate_match_in_registration_order() {
        let mut router = Router::new();
        router.add_handler_match("prefix-foo", |c| c.starts_with("/foo/"));
        assert!(router.matches("/foo/2.0.0"));
        assert!(!router.matches("/bar/2.0.0"));
    }

    #[test]
    fn remove_handler_drops_exact_and_named_predicate() {
        let mut router = Router::new();
        router.add_handler("/echo/1.0.0");
        router.add_handler_match("/echo/1.0.0", |_| true);
        router.remove_handler("/echo/1.0.0");
        assert!(!router.matches("/echo/1.0.0"));
        assert_eq!(router.protocols(), Vec::<String>::new());
    }
}
