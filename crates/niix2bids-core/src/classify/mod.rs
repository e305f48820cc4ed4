pub mod classifiers;
pub mod driver;
pub mod predicates;
pub mod routing;
pub mod sanity;
