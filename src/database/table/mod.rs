pub mod disclosure;
pub mod dividend;
pub mod financial_report;
pub mod revenue;
pub mod share_pledge;
