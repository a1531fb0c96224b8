//! Real-time profit-taking.
//!
//! BBO updates on either leg of an open hedge trigger a throttled net-PnL
//! re-evaluation; when the combined legs clear the profit threshold, the
//! monitor claims the position in the shared closing set and hands a close
//! request to the position closer. A second BBO read immediately before
//! handing off aborts closes whose edge already evaporated.

pub mod evaluator;
pub mod monitor;

pub use evaluator::{evaluate_immediate_profit, exit_price_pnl, ProfitEvaluation};
pub use monitor::{CloseRequest, MonitorSettings, RealTimeProfitMonitor};
