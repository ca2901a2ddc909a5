pub mod validation; // Payload → signature → integrity → dimensions
pub mod preprocess; // Decode, resize, normalize into a Tensor
