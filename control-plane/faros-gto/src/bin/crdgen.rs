use faros_gto::crd::{
    ClusterGitTrack, ClusterGitTrackObject, GitTrack, GitTrackObject,
};
use kube::core::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    let crds = [
        GitTrack::crd(),
        ClusterGitTrack::crd(),
        GitTrackObject::crd(),
        ClusterGitTrackObject::crd(),
    ];
    for crd in crds {
        println!("---\n{}", serde_yaml::to_string(&crd)?);
    }
    Ok(())
}
