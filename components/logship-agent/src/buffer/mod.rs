pub mod outbound_buffer;
