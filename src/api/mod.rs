pub mod pool_dto;
