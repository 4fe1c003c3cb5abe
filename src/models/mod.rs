mod checkout_intent;
mod completion;

pub use checkout_intent::*;
pub use completion::*;
