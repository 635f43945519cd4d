use kube::CustomResourceExt;

fn main() {
    print!(
        "{}",
        serde_yaml::to_string(&kueue_operator::resources::kueues::Kueue::crd()).unwrap()
    )
}
