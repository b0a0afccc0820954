mod account;
mod billing;
mod ledger;
mod money;
mod movement;
mod product;
mod sale;

pub use account::*;
pub use billing::*;
pub use ledger::*;
pub use money::*;
pub use movement::*;
pub use product::*;
pub use sale::*;
