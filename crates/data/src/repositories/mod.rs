//! SQL repositories, one per table family.

pub mod dashboard_repo;
pub mod funding_repo;
pub mod position_repo;
pub mod session_repo;
pub mod state_repo;
pub mod trade_fill_repo;

pub use dashboard_repo::DashboardRepo;
pub use funding_repo::FundingRepo;
pub use position_repo::PositionRepo;
pub use session_repo::SessionRepo;
pub use state_repo::StrategyStateRepo;
pub use trade_fill_repo::TradeFillRepo;
