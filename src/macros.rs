//! This module contains the macros used in the project.

/// Read a secret from a config section, prompting for it and saving it when
/// missing. Evaluates to `Result<Option<String>, OrgBackupError>`, `Ok(None)`
/// when there is no terminal to prompt on or the answer is empty.
macro_rules! config_secret {
    ($config:ident, $setting_name:ident, $struct_name:ident, $key_name:ident, $string:expr) => {
        match $config
            .config_data
            .$setting_name
            .as_ref()
            .and_then(|section| section.$key_name.clone())
            .filter(|value| !value.trim().is_empty())
        {
            Some(value) => Ok(Some(value)),
            None if !$config.interactive => Ok(None),
            None => {
                println!(concat!("Please enter ", $string, ":"));
                match $crate::utils::get_password() {
                    Ok(value) if value.trim().is_empty() => Ok(None),
                    Ok(value) => {
                        let value = value.trim().to_string();
                        let cloned_value = value.clone();
                        $config
                            .update(|config_data| {
                                config_data
                                    .$setting_name
                                    .get_or_insert_with($struct_name::default)
                                    .$key_name = Some(cloned_value);
                            })
                            .map(|()| Some(value))
                    }
                    Err(e) => Err(e),
                }
            }
        }
    };
}

pub(crate) use config_secret;
