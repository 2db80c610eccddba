mod adapter;
mod wifi;
