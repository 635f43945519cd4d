use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;

use crate::resources::kueues::Kueue;
use crate::Result;

use super::{adopt, assets};

pub fn custom_resource_definition(kueue: &Kueue, asset: &str) -> Result<CustomResourceDefinition> {
    let mut crd: CustomResourceDefinition = assets::read(asset)?;
    adopt(&mut crd, kueue, false)?;
    Ok(crd)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crds_are_cluster_scoped_and_owned() {
        let mut kueue = Kueue::new("cluster", Default::default());
        kueue.metadata.namespace = Some("kueue-system".into());
        kueue.metadata.uid = Some("1234".into());

        for asset in assets::CUSTOM_RESOURCE_DEFINITIONS {
            let crd = custom_resource_definition(&kueue, asset).unwrap();
            assert!(crd.metadata.namespace.is_none());
            assert_eq!(crd.metadata.owner_references.unwrap()[0].uid, "1234");
            assert!(crd
                .metadata
                .name
                .unwrap()
                .ends_with(".kueue.x-k8s.io"));
        }
    }
}
