//Residual U-Net: symmetric encoder/decoder where every stage is a plain convolution followed by a residual block
//
//Architecture (default widths, 256 x 256 input):
//  Input (3 x 256 x 256)
//  -> Enc1 (32 x 256 x 256) -> pool -> Enc2 (64 x 128 x 128) -> pool -> Enc3 (128 x 64 x 64) -> pool -> Enc4 (256 x 32 x 32) -> pool
//  -> Bottleneck (512 x 16 x 16)
//  -> Dec1 (256 x 32 x 32, + Enc4 skip) -> Dec2 (128 x 64 x 64, + Enc3 skip) -> Dec3 (64 x 128 x 128, + Enc2 skip) -> Dec4 (32 x 256 x 256, + Enc1 skip)
//  -> 1x1 Conv + sigmoid (3 x 256 x 256), values in [0, 1]
//
//Skip connections carry each encoder's pre-pooling feature map straight to the decoder at the same resolution, so detail lost to downsampling is still available when reconstructing

use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        interpolate::{Interpolate2d, Interpolate2dConfig, InterpolateMode},
        pool::{MaxPool2d, MaxPool2dConfig},
        Relu,
    },
    prelude::*,
    tensor::activation::sigmoid,
};

use super::residual_block::{conv3x3, ResidualBlock, ResidualBlockConfig};
use crate::error::{self, Error};

/// Each encoder halves the spatial size, so inputs must be divisible by 2^4.
pub const DOWNSAMPLING_FACTOR: usize = 16;

/*
Encoder stage: Conv 3x3 + ReLU raising the channel count, a residual block, then 2x2 max pooling.
The pre-pooling output is kept as the skip connection for the matching decoder stage.
*/
#[derive(Module, Debug)]
pub struct EncoderStage<B: Backend> {
    conv: Conv2d<B>,
    residual: ResidualBlock<B>,
    pool: MaxPool2d,
    activation: Relu,
}

impl<B: Backend> EncoderStage<B> {
    fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        Self {
            conv: conv3x3(in_channels, out_channels, device),
            residual: ResidualBlockConfig::new(out_channels).init(device),
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            activation: Relu::new(),
        }
    }

    /*
    @param x: tensor of shape [batch, in_channels, H, W]
    @return: (skip [batch, out_channels, H, W], pooled [batch, out_channels, H/2, W/2])
    */
    pub fn forward(&self, x: Tensor<B, 4>) -> (Tensor<B, 4>, Tensor<B, 4>) {
        let x = self.activation.forward(self.conv.forward(x));
        let skip = self.residual.forward(x);
        let pooled = self.pool.forward(skip.clone());
        (skip, pooled)
    }
}

/// Widest stage, running at the most downsampled resolution.
#[derive(Module, Debug)]
pub struct Bottleneck<B: Backend> {
    conv: Conv2d<B>,
    residual: ResidualBlock<B>,
    activation: Relu,
}

impl<B: Backend> Bottleneck<B> {
    fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        Self {
            conv: conv3x3(in_channels, out_channels, device),
            residual: ResidualBlockConfig::new(out_channels).init(device),
            activation: Relu::new(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.activation.forward(self.conv.forward(x));
        self.residual.forward(x)
    }
}

/*
Decoder stage: 2x nearest-neighbour upsampling, channel-wise concatenation with the skip connection, Conv 3x3 + ReLU fusing the concatenated channels down to the stage width, then a residual block.
*/
#[derive(Module, Debug)]
pub struct DecoderStage<B: Backend> {
    upsample: Interpolate2d,
    conv: Conv2d<B>,
    residual: ResidualBlock<B>,
    activation: Relu,
}

impl<B: Backend> DecoderStage<B> {
    fn new(in_channels: usize, skip_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        Self {
            upsample: Interpolate2dConfig::new()
                .with_scale_factor(Some([2.0, 2.0]))
                .with_mode(InterpolateMode::Nearest)
                .init(),
            conv: conv3x3(in_channels + skip_channels, out_channels, device),
            residual: ResidualBlockConfig::new(out_channels).init(device),
            activation: Relu::new(),
        }
    }

    /*
    @param x: output of the previous decoder (or the bottleneck), shape [batch, in_channels, H/2, W/2]
    @param skip: encoder feature map at the target resolution, shape [batch, skip_channels, H, W]
    @return: tensor of shape [batch, out_channels, H, W]
    */
    pub fn forward(&self, x: Tensor<B, 4>, skip: Tensor<B, 4>) -> Tensor<B, 4> {
        let upsampled = self.upsample.forward(x);
        let merged = Tensor::cat(vec![upsampled, skip], 1);
        let x = self.activation.forward(self.conv.forward(merged));
        self.residual.forward(x)
    }
}

/*
Residual U-Net mapping a normalized Lab image to its denoised approximation of the same shape.
Stages are named fields so the encoder -> skip -> decoder wiring reads directly off forward().
*/
#[derive(Module, Debug)]
pub struct ResUNet<B: Backend> {
    enc1: EncoderStage<B>,
    enc2: EncoderStage<B>,
    enc3: EncoderStage<B>,
    enc4: EncoderStage<B>,
    bottleneck: Bottleneck<B>,
    dec1: DecoderStage<B>, //mirrors enc4
    dec2: DecoderStage<B>, //mirrors enc3
    dec3: DecoderStage<B>, //mirrors enc2
    dec4: DecoderStage<B>, //mirrors enc1
    head: Conv2d<B>,       //1x1, stage width -> output channels
}

/*
Configuration for the U-Net widths.

@field input_channels: channels of the input image (default 3, L/a/b)
@field output_channels: channels of the output image (default 3)
@field enc1_channels..enc4_channels: encoder widths, reused by the mirrored decoders (default 32, 64, 128, 256)
@field bottleneck_channels: bottleneck width (default 512)
*/
#[derive(Config, Debug)]
pub struct ResUNetConfig {
    #[config(default = "3")]
    pub input_channels: usize,
    #[config(default = "3")]
    pub output_channels: usize,
    #[config(default = "32")]
    pub enc1_channels: usize,
    #[config(default = "64")]
    pub enc2_channels: usize,
    #[config(default = "128")]
    pub enc3_channels: usize,
    #[config(default = "256")]
    pub enc4_channels: usize,
    #[config(default = "512")]
    pub bottleneck_channels: usize,
}

impl ResUNetConfig {
    /// Widths `base, 2·base, 4·base, 8·base` with a `16·base` bottleneck.
    pub fn scaled(base: usize) -> Self {
        Self::new()
            .with_enc1_channels(base)
            .with_enc2_channels(base * 2)
            .with_enc3_channels(base * 4)
            .with_enc4_channels(base * 8)
            .with_bottleneck_channels(base * 16)
    }

    /*
    Initialize the network with random weights.

    @param device: the burn backend device to allocate tensors on
    @return: ResUNet ready for training
    */
    pub fn init<B: Backend>(&self, device: &B::Device) -> ResUNet<B> {
        let [c1, c2, c3, c4] = self.encoder_widths();
        let cb = self.bottleneck_channels;

        ResUNet {
            enc1: EncoderStage::new(self.input_channels, c1, device),
            enc2: EncoderStage::new(c1, c2, device),
            enc3: EncoderStage::new(c2, c3, device),
            enc4: EncoderStage::new(c3, c4, device),
            bottleneck: Bottleneck::new(c4, cb, device),
            dec1: DecoderStage::new(cb, c4, c4, device),
            dec2: DecoderStage::new(c4, c3, c3, device),
            dec3: DecoderStage::new(c3, c2, c2, device),
            dec4: DecoderStage::new(c2, c1, c1, device),
            head: Conv2dConfig::new([c1, self.output_channels], [1, 1]).init(device),
        }
    }

    pub fn encoder_widths(&self) -> [usize; 4] {
        [
            self.enc1_channels,
            self.enc2_channels,
            self.enc3_channels,
            self.enc4_channels,
        ]
    }

    /*
    Reject configurations burn cannot initialize: every channel count must be at least 1.

    @return: InvalidParameter naming the first zero width
    */
    pub fn validate(&self) -> error::Result<()> {
        let [c1, c2, c3, c4] = self.encoder_widths();
        let widths = [
            ("input_channels", self.input_channels),
            ("output_channels", self.output_channels),
            ("enc1_channels", c1),
            ("enc2_channels", c2),
            ("enc3_channels", c3),
            ("enc4_channels", c4),
            ("bottleneck_channels", self.bottleneck_channels),
        ];
        for (name, channels) in widths {
            if channels == 0 {
                return Err(Error::invalid(name, "channel count must be at least 1"));
            }
        }
        Ok(())
    }

    /*
    Check that an input resolution survives four 2x poolings and comes back to the same size after four 2x upsamplings.

    @param width, height: input size in pixels
    @return: InvalidParameter if either side is zero or not divisible by DOWNSAMPLING_FACTOR
    */
    pub fn check_input_size(&self, width: usize, height: usize) -> error::Result<()> {
        for (name, side) in [("image_width", width), ("image_height", height)] {
            if side == 0 || side % DOWNSAMPLING_FACTOR != 0 {
                return Err(Error::invalid(
                    name,
                    format!("{side} must be a positive multiple of {DOWNSAMPLING_FACTOR}"),
                ));
            }
        }
        Ok(())
    }

    /*
    Layer-by-layer text summary of the network for an input of the given size, logged before training in place of a rendered diagram.

    @return: one line per stage
    */
    pub fn describe(&self, width: usize, height: usize) -> Vec<String> {
        let [c1, c2, c3, c4] = self.encoder_widths();
        let mut lines = vec![format!("Input: {} x {} x {}", self.input_channels, height, width)];

        let mut prev = self.input_channels;
        for (i, c) in [c1, c2, c3, c4].into_iter().enumerate() {
            let scale = 1 << i;
            lines.push(format!(
                "Enc{}: Conv3x3 {} -> {} + Residual, skip {} x {} x {}, pool -> {} x {}",
                i + 1,
                prev,
                c,
                c,
                height / scale,
                width / scale,
                height / (scale * 2),
                width / (scale * 2)
            ));
            prev = c;
        }

        lines.push(format!(
            "Bottleneck: Conv3x3 {} -> {} + Residual at {} x {}",
            c4,
            self.bottleneck_channels,
            height / DOWNSAMPLING_FACTOR,
            width / DOWNSAMPLING_FACTOR
        ));

        let mut prev = self.bottleneck_channels;
        for (i, c) in [c4, c3, c2, c1].into_iter().enumerate() {
            let scale = DOWNSAMPLING_FACTOR >> (i + 1);
            lines.push(format!(
                "Dec{}: Upsample x2, concat Enc{} skip ({} + {}), Conv3x3 -> {} + Residual at {} x {}",
                i + 1,
                4 - i,
                prev,
                c,
                c,
                height / scale,
                width / scale
            ));
            prev = c;
        }

        lines.push(format!(
            "Head: Conv1x1 {} -> {} + sigmoid",
            c1, self.output_channels
        ));
        lines
    }
}

impl<B: Backend> ResUNet<B> {
    /*
    Forward pass (prediction) through the whole network.

    @param input: tensor of shape [batch, input_channels, H, W], H and W divisible by 16
    @return: tensor of shape [batch, output_channels, H, W] with values in [0, 1]
    */
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let (skip1, x) = self.enc1.forward(input);
        let (skip2, x) = self.enc2.forward(x);
        let (skip3, x) = self.enc3.forward(x);
        let (skip4, x) = self.enc4.forward(x);

        let x = self.bottleneck.forward(x);

        let x = self.dec1.forward(x, skip4);
        let x = self.dec2.forward(x, skip3);
        let x = self.dec3.forward(x, skip2);
        let x = self.dec4.forward(x, skip1);

        sigmoid(self.head.forward(x)) //sigmoid keeps every output channel in [0, 1]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CpuBackend;
    use burn::backend::ndarray::NdArrayDevice;
    use burn::tensor::Distribution;

    #[test]
    fn test_full_resolution_shape_and_range() {
        let device = NdArrayDevice::Cpu;
        //narrow widths keep the test fast, topology and resolution are the real ones
        let model = ResUNetConfig::scaled(2).init::<CpuBackend>(&device);
        let input = Tensor::<CpuBackend, 4>::random([1, 3, 256, 256], Distribution::Default, &device);

        let output = model.forward(input);
        assert_eq!(output.dims(), [1, 3, 256, 256]);

        let values: Vec<f32> = output.into_data().to_vec().unwrap();
        assert!(values.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_batch_and_non_square_inputs() {
        let device = NdArrayDevice::Cpu;
        let model = ResUNetConfig::scaled(4).init::<CpuBackend>(&device);
        let input = Tensor::<CpuBackend, 4>::random([2, 3, 32, 48], Distribution::Default, &device);

        assert_eq!(model.forward(input).dims(), [2, 3, 32, 48]);
    }

    #[test]
    fn test_default_widths() {
        let config = ResUNetConfig::new();
        assert_eq!(config.encoder_widths(), [32, 64, 128, 256]);
        assert_eq!(config.bottleneck_channels, 512);
        assert_eq!(ResUNetConfig::scaled(32).encoder_widths(), config.encoder_widths());
    }

    #[test]
    fn test_zero_widths_are_rejected() {
        assert!(ResUNetConfig::new().validate().is_ok());
        assert!(ResUNetConfig::scaled(1).validate().is_ok());
        assert!(matches!(
            ResUNetConfig::scaled(0).validate(),
            Err(Error::InvalidParameter { name, .. }) if name == "enc1_channels"
        ));
        assert!(ResUNetConfig::new().with_output_channels(0).validate().is_err());
        assert!(ResUNetConfig::new().with_bottleneck_channels(0).validate().is_err());
    }

    #[test]
    fn test_input_size_check() {
        let config = ResUNetConfig::new();
        assert!(config.check_input_size(256, 256).is_ok());
        assert!(config.check_input_size(32, 48).is_ok());
        assert!(config.check_input_size(250, 256).is_err());
        assert!(config.check_input_size(0, 256).is_err());
    }

    #[test]
    fn test_describe_covers_every_stage() {
        let lines = ResUNetConfig::new().describe(256, 256);
        assert_eq!(lines.len(), 11); //input, 4 encoders, bottleneck, 4 decoders, head
        assert!(lines[5].contains("512"));
        assert!(lines[5].contains("16 x 16"));
        assert!(lines[9].contains("256 x 256"));
    }
}
