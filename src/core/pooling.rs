//! Max- and average-pooling, applied to every channel of the input independently.
//!
//! Unlike convolution, the backward passes here overwrite the covered cells of `input_error`.

use crate::{
    Dims3, Error, Result, Window,
    error::check_len,
};

#[derive(Debug, Clone, Copy)]
struct Geometry {
    input: Dims3,
    window: Window,
    output: Dims3,
}

impl Geometry {
    fn new(input: Dims3, window: Window) -> Result<Self> {
        let (rows, cols) = window.output_size(input.rows, input.cols)?;
        Ok(Self {
            input,
            window,
            output: Dims3::new(input.channels, rows, cols),
        })
    }

    /// `(output index, input index of the window's top-left cell)` for every written output cell.
    fn windows(&self) -> impl Iterator<Item = (usize, usize)> + use<> {
        let Self {
            input,
            window,
            output,
        } = *self;
        let p = window.padding;
        let inner_rows = output.rows - 2 * p;
        let inner_cols = output.cols - 2 * p;
        (0..input.channels).flat_map(move |c| {
            (0..inner_rows).flat_map(move |i| {
                (0..inner_cols).map(move |j| {
                    (
                        output.index(c, p + i, p + j),
                        input.index(c, i * window.stride, j * window.stride),
                    )
                })
            })
        })
    }

    /// Input indices covered by the window starting at `origin`, in scan order.
    fn window_cells(&self, origin: usize) -> impl Iterator<Item = usize> + use<> {
        let Self { input, window, .. } = *self;
        (0..window.rows)
            .flat_map(move |k1| (0..window.cols).map(move |k2| origin + k1 * input.cols + k2))
    }

    fn check_buffers(
        &self,
        input_name: &str,
        input: &[f32],
        output_name: &str,
        output: &[f32],
    ) -> Result<()> {
        check_len(input_name, input, self.input.len())?;
        check_len(output_name, output, self.output.len())
    }

    /// Index of the first strict maximum of every window.
    fn argmaxes(&self, input: &[f32]) -> Result<Vec<usize>> {
        self.windows()
            .map(|(_, origin)| {
                let mut max = f32::NEG_INFINITY;
                let mut argmax = None;
                for x in self.window_cells(origin) {
                    if input[x] > max {
                        max = input[x];
                        argmax = Some(x);
                    }
                }
                argmax.ok_or_else(|| {
                    Error::dimension_mismatch(format!(
                        "no element of the pooling window at input index {origin} exceeds -inf"
                    ))
                })
            })
            .collect()
    }
}

/// Writes the maximum of every window into `output` and returns the output shape.
///
/// Ties go to the first maximum in row-major scan order.
pub fn max_feed_forward(
    input: &[f32],
    input_dims: Dims3,
    window: Window,
    output: &mut [f32],
) -> Result<Dims3> {
    let geometry = Geometry::new(input_dims, window)?;
    geometry.check_buffers("input", input, "output", output)?;
    let argmaxes = geometry.argmaxes(input)?;
    for ((o, _), argmax) in geometry.windows().zip(argmaxes) {
        output[o] = input[argmax];
    }
    Ok(geometry.output)
}

/// Routes each window's `output_error` to the cell that won the forward pass; the rest of the
/// window gets 0.
pub fn max_back_propagate(
    input: &[f32],
    input_dims: Dims3,
    window: Window,
    output_error: &[f32],
    input_error: &mut [f32],
) -> Result<()> {
    let geometry = Geometry::new(input_dims, window)?;
    geometry.check_buffers("input", input, "output_error", output_error)?;
    check_len("input_error", input_error, input_dims.len())?;
    let argmaxes = geometry.argmaxes(input)?;
    for ((o, origin), argmax) in geometry.windows().zip(argmaxes) {
        for x in geometry.window_cells(origin) {
            input_error[x] = match x == argmax {
                true => output_error[o],
                false => 0.0,
            };
        }
    }
    Ok(())
}

/// Writes the mean of every window into `output` and returns the output shape.
pub fn average_feed_forward(
    input: &[f32],
    input_dims: Dims3,
    window: Window,
    output: &mut [f32],
) -> Result<Dims3> {
    let geometry = Geometry::new(input_dims, window)?;
    geometry.check_buffers("input", input, "output", output)?;
    let area = window.area() as f32;
    for (o, origin) in geometry.windows() {
        let sum: f32 = geometry.window_cells(origin).map(|x| input[x]).sum();
        output[o] = sum / area;
    }
    Ok(geometry.output)
}

/// Spreads each window's `output_error` evenly over the window.
pub fn average_back_propagate(
    input_dims: Dims3,
    window: Window,
    output_error: &[f32],
    input_error: &mut [f32],
) -> Result<()> {
    let geometry = Geometry::new(input_dims, window)?;
    geometry.check_buffers("input_error", input_error, "output_error", output_error)?;
    let area = window.area() as f32;
    for (o, origin) in geometry.windows() {
        let share = output_error[o] / area;
        for x in geometry.window_cells(origin) {
            input_error[x] = share;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const INPUT: [f32; 16] = [
        1.0, 3.0, 2.0, 0.0, //
        4.0, 2.0, 2.0, 9.0, //
        -1.0, 5.0, 7.0, 7.0, //
        0.0, 5.0, 6.0, 1.0, //
    ];

    #[test]
    fn max_pool_picks_window_maxima() {
        let mut output = vec![0.0; 4];
        let dims =
            max_feed_forward(&INPUT, Dims3::plane(4, 4), Window::square(2), &mut output).unwrap();
        assert_eq!(dims, Dims3::plane(2, 2));
        assert_eq!(output, [4.0, 9.0, 5.0, 7.0]);
    }

    #[test]
    fn max_pool_backward_routes_to_first_maximum() {
        let mut input_error = vec![-1.0; 16];
        let output_error = [0.5, -2.0, 3.0, 1.5];
        let (dims, window) = (Dims3::plane(4, 4), Window::square(2));
        max_back_propagate(&INPUT, dims, window, &output_error, &mut input_error).unwrap();
        // Tied 5s and 7s: the first in scan order wins.
        assert_eq!(
            input_error,
            [
                0.0, 0.0, 0.0, 0.0, //
                0.5, 0.0, 0.0, -2.0, //
                0.0, 3.0, 1.5, 0.0, //
                0.0, 0.0, 0.0, 0.0, //
            ]
        );
        for (w, &e) in output_error.iter().enumerate() {
            let (r0, c0) = ((w / 2) * 2, (w % 2) * 2);
            let cells = [r0 * 4 + c0, r0 * 4 + c0 + 1, (r0 + 1) * 4 + c0, (r0 + 1) * 4 + c0 + 1];
            let sum: f32 = cells.iter().map(|&x| input_error[x]).sum();
            assert_eq!(sum, e);
            assert_eq!(cells.iter().filter(|&&x| input_error[x] != 0.0).count(), 1);
        }
    }

    #[test]
    fn max_pool_handles_very_negative_windows() {
        let input = [-1e6, -2e6, -3e6, -4e6];
        let mut output = vec![0.0; 1];
        max_feed_forward(&input, Dims3::plane(2, 2), Window::square(2), &mut output).unwrap();
        assert_eq!(output, [-1e6]);
    }

    #[test]
    fn max_pool_rejects_windows_without_a_maximum() {
        let input = [f32::NEG_INFINITY, f32::NAN, f32::NEG_INFINITY, f32::NEG_INFINITY];
        let mut output = vec![42.0; 1];
        let result = max_feed_forward(&input, Dims3::plane(2, 2), Window::square(2), &mut output);
        assert!(matches!(result, Err(Error::DimensionMismatch { .. })));
        assert_eq!(output, [42.0]);
    }

    #[test]
    fn pooling_runs_per_channel_with_padding() {
        let input: Vec<f32> = (0..8).map(|x| x as f32).collect();
        let window = Window::new(2, 2, 2, 1);
        // (2 - 2) / 2 + 1 + 2 = 3
        let mut output = vec![-1.0; 18];
        let dims = max_feed_forward(&input, Dims3::new(2, 2, 2), window, &mut output).unwrap();
        assert_eq!(dims, Dims3::new(2, 3, 3));
        assert_eq!(output[4], 3.0);
        assert_eq!(output[13], 7.0);
        assert_eq!(output.iter().filter(|&&x| x == -1.0).count(), 16);

        let mut output = vec![0.0; 18];
        average_feed_forward(&input, Dims3::new(2, 2, 2), window, &mut output).unwrap();
        assert_eq!(output[4], 1.5);
        assert_eq!(output[13], 5.5);
    }

    #[test]
    fn average_pool_forward_and_backward() {
        let mut output = vec![0.0; 4];
        average_feed_forward(&INPUT, Dims3::plane(4, 4), Window::square(2), &mut output).unwrap();
        assert_eq!(output, [2.5, 3.25, 2.25, 5.25]);

        let output_error = [4.0, -8.0, 2.0, 1.0];
        let mut input_error = vec![9.0; 16];
        let (dims, window) = (Dims3::plane(4, 4), Window::square(2));
        average_back_propagate(dims, window, &output_error, &mut input_error).unwrap();
        assert_eq!(&input_error[0..4], &[1.0, 1.0, -2.0, -2.0]);
        assert_eq!(&input_error[12..16], &[0.5, 0.5, 0.25, 0.25]);
        let total: f32 = input_error.iter().sum();
        assert_eq!(total, output_error.iter().sum::<f32>());
    }

    #[test]
    fn fractional_output_size_is_rejected() {
        let mut output = vec![0.0; 4];
        let result =
            average_feed_forward(&[0.0; 9], Dims3::plane(3, 3), Window::square(2), &mut output);
        assert!(matches!(result, Err(Error::DimensionMismatch { .. })));
    }
}
