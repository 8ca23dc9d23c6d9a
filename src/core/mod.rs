pub mod approximate_count;
pub mod display_format;
pub mod executor;
pub mod filter_categorizer;
pub mod filters;
pub mod fk_resolver;
pub mod identifiers;
pub mod pagination;
pub mod query_builder;
pub mod statement;

#[cfg(test)]
pub mod test_support;
