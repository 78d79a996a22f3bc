pub mod ingest_service;
pub mod storage_service;
