//Residual block: two 3x3 convolutions whose output is added back onto the block input
//The block learns a correction to its input instead of a replacement, which keeps gradients flowing through deep stacks

use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        PaddingConfig2d, Relu,
    },
    prelude::*,
};

/*
Residual block layers.

Data flow:
    input (C channels) -> Conv 3x3 -> ReLU -> Conv 3x3 -> (+ input) -> ReLU -> output (C channels)

The identity shortcut needs the second convolution to produce exactly as many channels as the input, so both convolutions keep C.
*/
#[derive(Module, Debug)]
pub struct ResidualBlock<B: Backend> {
    conv1: Conv2d<B>,
    conv2: Conv2d<B>, //no activation before the shortcut add
    activation: Relu,
}

/*
@field channels: channel count of both the input and the output feature map
*/
#[derive(Config, Debug)]
pub struct ResidualBlockConfig {
    pub channels: usize,
}

impl ResidualBlockConfig {
    /*
    Initialize the block with random weights.

    @param device: the burn backend device to allocate tensors on
    @return: ResidualBlock mapping C channels to C channels at the same spatial size
    */
    pub fn init<B: Backend>(&self, device: &B::Device) -> ResidualBlock<B> {
        ResidualBlock {
            conv1: conv3x3(self.channels, self.channels, device),
            conv2: conv3x3(self.channels, self.channels, device),
            activation: Relu::new(),
        }
    }
}

impl<B: Backend> ResidualBlock<B> {
    /*
    @param input: tensor of shape [batch, C, height, width]
    @return: tensor of the same shape
    */
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv1.forward(input.clone());
        let x = self.activation.forward(x);
        let x = self.conv2.forward(x);

        self.activation.forward(x + input)
    }
}

//3x3 convolution with same padding, spatial size is preserved
pub(crate) fn conv3x3<B: Backend>(in_channels: usize, out_channels: usize, device: &B::Device) -> Conv2d<B> {
    Conv2dConfig::new([in_channels, out_channels], [3, 3])
        .with_padding(PaddingConfig2d::Same)
        .init(device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CpuBackend;
    use burn::backend::ndarray::NdArrayDevice;
    use burn::tensor::Distribution;

    #[test]
    fn test_shape_is_preserved() {
        let device = NdArrayDevice::Cpu;

        for (channels, height, width) in [(1, 5, 7), (4, 16, 16), (8, 9, 3), (32, 32, 32)] {
            let block = ResidualBlockConfig::new(channels).init::<CpuBackend>(&device);
            let input = Tensor::<CpuBackend, 4>::random([2, channels, height, width], Distribution::Default, &device);

            let output = block.forward(input);
            assert_eq!(output.dims(), [2, channels, height, width]);
        }
    }

    #[test]
    fn test_output_is_non_negative() {
        let device = NdArrayDevice::Cpu;
        let block = ResidualBlockConfig::new(4).init::<CpuBackend>(&device);
        let input = Tensor::<CpuBackend, 4>::random([1, 4, 8, 8], Distribution::Normal(0.0, 1.0), &device);

        let output: Vec<f32> = block.forward(input).into_data().to_vec().unwrap();
        assert!(output.iter().all(|v| *v >= 0.0)); //final ReLU
    }
}
