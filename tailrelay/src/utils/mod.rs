// Utilities module
//
// - validation: Common validation helpers

pub mod validation;
