pub mod blob;
pub mod classifier;
pub mod dispatcher;
pub mod queue;
pub mod results;

#[cfg(test)]
pub mod testing;
