//! Shelf Scheduler Library
//!
//! Coordination primitives for render work: cancellation tokens that tie
//! in-flight renders to the liveness of their document session, and a
//! single-flight set that keeps overlapping window passes from rendering the
//! same page twice.
//!
//! # Example
//!
//! ```
//! use shelf_scheduler::{CancellationRegistry, SingleFlight};
//!
//! let sessions: CancellationRegistry<&str> = CancellationRegistry::new();
//! let renders: SingleFlight<(&str, u32), Vec<u8>> = SingleFlight::new();
//!
//! let token = sessions.register("doc");
//! let (bytes, _) = renders.run(("doc", 1), || vec![0u8; 4]);
//!
//! if !token.is_cancelled() {
//!     assert_eq!(bytes.len(), 4);
//! }
//!
//! // Closing the document cancels the token; late results are dropped.
//! sessions.cancel(&"doc");
//! assert!(token.is_cancelled());
//! ```

mod cancel;
mod single_flight;

pub use cancel::{CancellationRegistry, CancellationToken};
pub use single_flight::{FlightRole, SingleFlight};
