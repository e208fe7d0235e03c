pub mod ice_candidate;
pub mod ice_connection_state;
pub mod ice_credential_type;
pub mod ice_gathering_state;
pub mod ice_server;
