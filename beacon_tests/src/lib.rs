/*! # Beacon Tests

Integration tests driving the whole server lifecycle against in-memory doubles of the transport, the
scene loader and the hosting platform.
*/

extern crate alloc;

pub mod stepper;
