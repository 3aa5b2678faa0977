mod consultation;
mod flow_code;
mod schedule;
mod state;

pub use consultation::*;
pub use flow_code::*;
pub use schedule::*;
pub use state::*;
