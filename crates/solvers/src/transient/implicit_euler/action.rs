/// Control actions supported by the implicit Euler integrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Stop integrating and return with the state committed so far.
    StopEarly,
}
