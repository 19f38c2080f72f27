// CLI module
//
// This module contains command-line interface functionality:
// - arguments: Command-line argument parsing and the one-shot management commands

pub mod arguments;

pub use arguments::TailrelayArguments;
