//! Identity verification for Chilean national ID cards.

pub mod biometric;
pub mod config;
pub mod db;
pub mod error;
pub mod routes;
pub mod state;

pub mod crypto {
    pub mod aes;
    pub mod embedding;
}

pub mod models {
    pub mod doc_data;
    pub mod session;
}

pub mod validation {
    pub mod rut;
    pub mod verification;
}

pub mod extraction {
    pub mod back_document;
    pub mod fields;
    pub mod mrz;
    pub mod mrz_locator;
}

pub mod repositories {
    pub mod session;
}

pub mod services {
    pub mod face;
    pub mod ocr;
    pub mod verification;
}

pub mod handlers {
    pub mod verification;
}

pub mod middleware_layer {
    pub mod rate_limit;
}
