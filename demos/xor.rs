use sudonet::activation::Activation;
use sudonet::network::Network;
use sudonet::tensors::Tensor2D;

fn main() {
    let inputs = Tensor2D::from_rows(&[[0.0, 0.0], [0.0, 1.0], [1.0, 0.0], [1.0, 1.0]]);
    // one-hot: column 0 is "false", column 1 is "true"
    let labels = Tensor2D::from_rows(&[[1.0, 0.0], [0.0, 1.0], [0.0, 1.0], [1.0, 0.0]]);

    // model: 2 → 32 → 32 → 2; other seeds may leave 0 XOR 0 unlearned
    let mut net = Network::fully_connected(&[2, 32, 32, 2], Activation::LeakyRelu, Activation::Softmax, 7);

    let lr = 0.001;
    let batches = 10_000;

    for batch in 0..batches {
        let loss = net.train_batch(&inputs, &labels, lr);
        if batch % 1_000 == 0 {
            println!("batch {batch:>5}: loss = {loss:.6}");
        }
    }

    let prediction = net.predict(&inputs);
    for r in 0..inputs.rows() {
        let x = inputs.row(r);
        let p = prediction.row(r);
        println!("{} XOR {} -> P(true) = {:.4}", x[0], x[1], p[1]);
    }

    match net.save("xor-weights") {
        Ok(()) => println!("saved weights to xor-weights.*.swt"),
        Err(e) => eprintln!("failed to save weights: {e}"),
    }
}
