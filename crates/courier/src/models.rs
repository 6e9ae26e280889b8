//! These models represent the objects passed between the broker and its collaborators
//!
//! There are several different related formats we need to interact with:
//! - multipart chat submissions, sent from the client to the broker
//! - vercel streaming protocol frames, sent from the broker to the client
//! - openai messages/tools, sent from the broker to the model backend
//! - MCP tool descriptors and call results, exchanged with tool providers
//!
//! We always immediately convert those formats into the internal structs here.
pub mod message;
pub mod role;
pub mod tool;
