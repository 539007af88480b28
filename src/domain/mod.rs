mod account;
mod activity;
mod ledger;
mod money;
mod operation;

pub use account::*;
pub use activity::*;
pub use ledger::*;
pub use money::*;
pub use operation::*;
