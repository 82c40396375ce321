//! Modelchat is a terminal chat front-end for local command-line model
//! runners such as `ollama`.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`core`] owns the invocation pipeline: command quoting, the process
//!   invoker, the escape filter that cleans runner output, the per-request
//!   invocation session, the model client facade, and the chat history store.
//! - [`cli`] parses arguments and runs the interactive chat loop and the
//!   one-shot `say` and `history` commands.
//! - [`utils`] carries diagnostics setup and the command/output console echo.
//!
//! Runtime entrypoints live in the binary crate (`src/main.rs`) and route
//! through [`crate::cli::main`].

pub mod cli;
pub mod core;
pub mod utils;
