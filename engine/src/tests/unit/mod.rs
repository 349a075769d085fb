mod approvals;
mod engine_flow;
