//Residual U-Net denoiser built with the burn framework
//Residual blocks are the building unit, the U-Net composes them into an encoder/decoder with skip connections

pub mod res_unet;
pub mod residual_block;

pub use res_unet::{Bottleneck, DecoderStage, EncoderStage, ResUNet, ResUNetConfig};
pub use residual_block::{ResidualBlock, ResidualBlockConfig};
