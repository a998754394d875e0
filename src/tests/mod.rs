
mod linear;
mod power_flow;
