//! Call counters, loop counters and type feedback

use std::collections::HashMap;

use crate::bytecode::{CodeId, Value};

use super::types::Ty;

/// What has been observed at one point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feedback<T> {
    /// Always the same
    Mono(T),
    /// More than one, or something compiled code cannot hold
    Poly,
}

impl<T: PartialEq + Copy> Feedback<T> {
    fn merge(slot: &mut Option<Feedback<T>>, seen: Option<T>) {
        *slot = Some(match (*slot, seen) {
            (_, None) | (Some(Feedback::Poly), _) => Feedback::Poly,
            (None, Some(t)) => Feedback::Mono(t),
            (Some(Feedback::Mono(old)), Some(t)) if old == t => Feedback::Mono(t),
            (Some(Feedback::Mono(_)), Some(_)) => Feedback::Poly,
        });
    }
}

/// Everything recorded for one code object
#[derive(Debug, Default)]
pub struct Profile {
    pub calls: u32,
    /// Back edges taken, by loop header offset
    pub back_edges: HashMap<usize, u32>,
    pub params: Vec<Option<Feedback<Ty>>>,
    /// Operand types of binary and comparison instructions, by offset
    pub sites: HashMap<usize, Feedback<(Ty, Ty)>>,
    pub returns: Option<Feedback<Ty>>,
}

impl Profile {
    /// Feedback for the instruction at `offset`, if it ran while warm
    #[must_use]
    pub fn site(&self, offset: usize) -> Option<Feedback<(Ty, Ty)>> {
        self.sites.get(&offset).copied()
    }

    /// The single type this code has returned, if any
    #[must_use]
    pub fn return_type(&self) -> Option<Ty> {
        match self.returns {
            Some(Feedback::Mono(ty)) => Some(ty),
            _ => None,
        }
    }

    fn hottest_loop(&self) -> u32 {
        self.back_edges.values().copied().max().unwrap_or(0)
    }
}

/// Per-code-object counters
#[derive(Debug, Default)]
pub struct Profiler {
    profiles: HashMap<CodeId, Profile>,
}

impl Profiler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn profile(&self, code: CodeId) -> Option<&Profile> {
        self.profiles.get(&code)
    }

    /// Count a call and return the new total
    pub fn record_call(&mut self, code: CodeId) -> u32 {
        let profile = self.profiles.entry(code).or_default();
        profile.calls = profile.calls.saturating_add(1);
        profile.calls
    }

    /// Count a back edge to `header` and return the new total
    pub fn record_back_edge(&mut self, code: CodeId, header: usize) -> u32 {
        let count = self
            .profiles
            .entry(code)
            .or_default()
            .back_edges
            .entry(header)
            .or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    pub fn record_params(&mut self, code: CodeId, args: &[Value]) {
        let profile = self.profiles.entry(code).or_default();
        if profile.params.len() < args.len() {
            profile.params.resize(args.len(), None);
        }
        for (slot, arg) in profile.params.iter_mut().zip(args) {
            Feedback::merge(slot, Ty::of(arg));
        }
    }

    pub fn record_operands(&mut self, code: CodeId, offset: usize, a: &Value, b: &Value) {
        let seen = Ty::of(a).zip(Ty::of(b));
        let profile = self.profiles.entry(code).or_default();
        let mut slot = profile.sites.get(&offset).copied();
        Feedback::merge(&mut slot, seen);
        if let Some(feedback) = slot {
            profile.sites.insert(offset, feedback);
        }
    }

    pub fn record_return(&mut self, code: CodeId, value: &Value) {
        let profile = self.profiles.entry(code).or_default();
        Feedback::merge(&mut profile.returns, Ty::of(value));
    }

    /// Whether frames of `code` should collect feedback: past half of
    /// either threshold
    #[must_use]
    pub fn is_warm(&self, code: CodeId, call_threshold: u32, loop_threshold: u32) -> bool {
        self.profiles.get(&code).is_some_and(|profile| {
            profile.calls.saturating_mul(2) >= call_threshold
                || profile.hottest_loop().saturating_mul(2) >= loop_threshold
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let mut profiler = Profiler::new();
        let code = CodeId::fresh();
        assert_eq!(profiler.record_call(code), 1);
        assert_eq!(profiler.record_call(code), 2);
        assert_eq!(profiler.record_back_edge(code, 10), 1);
        assert_eq!(profiler.record_back_edge(code, 10), 2);
        assert_eq!(profiler.record_back_edge(code, 30), 1);
        assert!(profiler.is_warm(code, 4, 100));
        assert!(!profiler.is_warm(code, 5, 100));
        assert!(profiler.is_warm(code, 100, 4));
    }

    #[test]
    fn feedback_goes_polymorphic_on_a_second_type() {
        let mut profiler = Profiler::new();
        let code = CodeId::fresh();
        profiler.record_operands(code, 4, &Value::Int(1), &Value::Int(2));
        profiler.record_operands(code, 4, &Value::Int(3), &Value::Int(4));
        let profile = profiler.profile(code).unwrap();
        assert_eq!(profile.site(4), Some(Feedback::Mono((Ty::Int, Ty::Int))));

        profiler.record_operands(code, 4, &Value::Float(1.0), &Value::Int(4));
        assert_eq!(profiler.profile(code).unwrap().site(4), Some(Feedback::Poly));
    }

    #[test]
    fn non_primitive_values_are_polymorphic() {
        let mut profiler = Profiler::new();
        let code = CodeId::fresh();
        profiler.record_return(code, &Value::str("s"));
        assert_eq!(profiler.profile(code).unwrap().return_type(), None);

        let other = CodeId::fresh();
        profiler.record_return(other, &Value::Int(1));
        assert_eq!(profiler.profile(other).unwrap().return_type(), Some(Ty::Int));

        profiler.record_params(other, &[Value::Int(1), Value::list(Vec::new())]);
        let params = &profiler.profile(other).unwrap().params;
        assert_eq!(params[0], Some(Feedback::Mono(Ty::Int)));
        assert_eq!(params[1], Some(Feedback::Poly));
    }
}
