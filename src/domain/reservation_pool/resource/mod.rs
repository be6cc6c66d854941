pub mod resource_spec;
