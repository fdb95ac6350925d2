pub mod framed;
pub mod shared;

#[cfg(test)]
mod framed_test;
#[cfg(test)]
mod shared_test;
