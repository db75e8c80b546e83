pub mod base;
pub mod bedrock;

#[cfg(test)]
pub mod mock;
