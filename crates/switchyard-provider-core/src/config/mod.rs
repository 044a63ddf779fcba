mod policy;

pub use policy::{
    Candidate, CandidateOrdering, PolicyTable, RetryPolicy, RoutingPolicy, WeightedCandidate,
};
